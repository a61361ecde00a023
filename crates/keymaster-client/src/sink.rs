//! Cloud access-key credential sink
//!
//! Merges `iam` credentials into an AWS-style shared credentials file, one
//! profile per credential. Other credential kinds are left to other sinks.

use keymaster_core::{Credential, IamCredential};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::WriteError;
use crate::profile_store::ProfileStore;

/// Render one profile section
pub fn render_profile(profile_name: &str, credential: &IamCredential) -> String {
    format!(
        "[{}]\naws_access_key_id     = {}\naws_secret_access_key = {}\naws_session_token     = {}\n\n",
        profile_name, credential.access_key_id, credential.secret_access_key, credential.session_token
    )
}

/// Merge credentials into existing store contents
///
/// Returns `None` when there is nothing to write. With `rename_to`, only
/// the first `iam` credential is written, under that profile name. A blank
/// `rename_to` counts as unset.
pub fn persist(
    existing: Option<&[u8]>,
    credentials: &[Credential],
    rename_to: Option<&str>,
) -> Result<Option<Vec<u8>>, WriteError> {
    let mut profiles: Vec<(String, &IamCredential)> = credentials
        .iter()
        .filter_map(|c| c.as_iam())
        .map(|iam| (iam.profile_name.clone(), iam))
        .collect();

    if let Some(target) = rename_to.filter(|name| !name.trim().is_empty()) {
        if profiles.is_empty() {
            warn!(profile = %target, "No iam credentials to write for profile");
            return Ok(None);
        }
        if profiles.len() > 1 {
            warn!(expected = 1, received = profiles.len(), "Too many iam credentials; using the first");
        }
        let (original, credential) = profiles.swap_remove(0);
        info!(from = %original, to = %target, "Renaming iam credential");
        profiles = vec![(target.to_string(), credential)];
    }

    if profiles.is_empty() {
        debug!("No iam credentials to write");
        return Ok(None);
    }

    let text = match existing {
        Some(bytes) => std::str::from_utf8(bytes).map_err(|e| WriteError::Malformed {
            line: 1 + bytes[..e.valid_up_to()].iter().filter(|b| **b == b'\n').count(),
            reason: "not valid UTF-8".into(),
        })?,
        None => "",
    };
    let mut store = ProfileStore::parse(text)?;

    for (name, credential) in profiles {
        info!(profile = %name, "Writing iam credential");
        store.upsert(&name, render_profile(&name, credential));
    }

    Ok(Some(store.render().into_bytes()))
}

/// Merge credentials into the credentials file at `path`
///
/// A missing file is treated as empty. Returns whether the file was written.
pub fn save_iam_credentials(path: &Path, credentials: &[Credential], rename_to: Option<&str>) -> Result<bool, WriteError> {
    let io_error = |source: std::io::Error| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let existing = match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No existing credentials file");
            None
        }
        Err(err) => return Err(io_error(err)),
    };

    let Some(updated) = persist(existing.as_deref(), credentials, rename_to)? else {
        return Ok(false);
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    write_private(path, &updated).map_err(io_error)?;

    info!(path = %path.display(), "Updated credentials file");
    Ok(true)
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    // mode() only applies on creation
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymaster_core::CredentialValue;

    fn iam(name: &str, profile: &str, suffix: &str) -> Credential {
        Credential {
            name: name.into(),
            expiry: 1,
            value: CredentialValue::Iam(IamCredential {
                profile_name: profile.into(),
                role_arn: format!("Bar{}", suffix),
                role_session_name: format!("123{}", suffix),
                access_key_id: format!("abc{}", suffix),
                secret_access_key: format!("def{}", suffix),
                session_token: format!("ghi{}", suffix),
            }),
        }
    }

    fn render(bytes: Option<Vec<u8>>) -> String {
        String::from_utf8(bytes.unwrap()).unwrap()
    }

    #[test]
    fn test_single_credential_format() {
        let out = persist(None, &[iam("nonprod-deployment", "Foo", "")], None).unwrap();
        assert_eq!(
            render(out),
            "[Foo]\naws_access_key_id     = abc\naws_secret_access_key = def\naws_session_token     = ghi\n\n"
        );
    }

    #[test]
    fn test_forced_profile_name() {
        let out = persist(None, &[iam("nonprod-deployment", "Foo", "")], Some("default")).unwrap();
        assert_eq!(
            render(out),
            "[default]\naws_access_key_id     = abc\naws_secret_access_key = def\naws_session_token     = ghi\n\n"
        );
    }

    #[test]
    fn test_multiple_credentials_in_order() {
        let creds = [iam("nonprod-deployment", "Foo", ""), iam("nonprod-ro", "FooX", "X")];
        let out = persist(None, &creds, None).unwrap();
        assert_eq!(
            render(out),
            "[Foo]\naws_access_key_id     = abc\naws_secret_access_key = def\naws_session_token     = ghi\n\n\
             [FooX]\naws_access_key_id     = abcX\naws_secret_access_key = defX\naws_session_token     = ghiX\n\n"
        );
    }

    #[test]
    fn test_rename_uses_first_of_many() {
        let creds = [iam("nonprod-deployment", "Foo", ""), iam("nonprod-ro", "FooX", "X")];
        let text = render(persist(None, &creds, Some("default")).unwrap());

        let store = ProfileStore::parse(&text).unwrap();
        assert_eq!(store.profile_names(), vec!["default"]);
        assert!(text.contains("aws_access_key_id     = abc\n"));
        assert!(!text.contains("abcX"));
    }

    #[test]
    fn test_blank_rename_target_is_unset() {
        let creds = [iam("nonprod-deployment", "Foo", ""), iam("nonprod-ro", "FooX", "X")];
        let unset = persist(None, &creds, None).unwrap();
        assert_eq!(persist(None, &creds, Some("")).unwrap(), unset);
        assert_eq!(persist(None, &creds, Some("  ")).unwrap(), unset);

        let text = render(unset);
        assert!(!text.contains("[]"));
        assert_eq!(ProfileStore::parse(&text).unwrap().profile_names(), vec!["Foo", "FooX"]);
    }

    #[test]
    fn test_rename_with_no_iam_credentials_is_noop() {
        assert_eq!(persist(Some(b"[x]\nk = v\n".as_slice()), &[], Some("default")).unwrap(), None);
    }

    #[test]
    fn test_persist_is_idempotent() {
        let creds = [iam("nonprod-deployment", "Foo", "")];
        let once = persist(Some(b"[other]\nk = v\n".as_slice()), &creds, None).unwrap().unwrap();
        let twice = persist(Some(once.as_slice()), &creds, None).unwrap().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unrelated_profile_preserved_byte_for_byte() {
        let existing = "[X]\naws_access_key_id=KEEP   \n# odd spacing stays\n\n[Y]\naws_access_key_id = OLD\n";
        let out = render(persist(Some(existing.as_bytes()), &[iam("nonprod", "Y", "2")], None).unwrap());

        assert!(out.starts_with("[X]\naws_access_key_id=KEEP   \n# odd spacing stays\n\n[Y]\n"));
        assert!(out.contains("aws_access_key_id     = abc2\n"));
        assert!(!out.contains("OLD"));

        let store = ProfileStore::parse(&out).unwrap();
        assert_eq!(store.profile_names(), vec!["X", "Y"]);
    }

    #[test]
    fn test_malformed_store_refused() {
        let result = persist(Some(b"this is not a credentials file\n".as_slice()), &[iam("a", "Foo", "")], None);
        assert!(matches!(result, Err(WriteError::Malformed { .. })));
    }

    #[test]
    fn test_save_creates_private_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".aws").join("credentials");

        assert!(save_iam_credentials(&path, &[iam("a", "Foo", "")], None).unwrap());
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("[Foo]\n"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_save_leaves_malformed_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        fs::write(&path, "garbage without sections\n").unwrap();

        assert!(save_iam_credentials(&path, &[iam("a", "Foo", "")], None).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "garbage without sections\n");
    }

    #[test]
    fn test_save_nothing_to_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        assert!(!save_iam_credentials(&path, &[], None).unwrap());
        assert!(!path.exists());
    }
}
