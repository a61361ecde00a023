//! Resource references embedded in configuration
//!
//! Certificates and keys in a config snapshot may be given inline or by
//! reference. A reference is one of:
//!
//! - `file://<path>` - read from the local filesystem
//! - `data://<base64>` - inline, base64 encoded
//! - `s3://<bucket>/<key>` - fetched through a [`BlobStore`]
//! - anything else - an opaque literal, passed through unchanged

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use tracing::debug;

use crate::error::ResourceError;

const FILE_SCHEME: &str = "file://";
const DATA_SCHEME: &str = "data://";
const S3_SCHEME: &str = "s3://";

/// A parsed resource reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef<'a> {
    File(&'a str),
    Data(&'a str),
    Blob { bucket: &'a str, key: &'a str },
    Literal(&'a str),
}

impl<'a> ResourceRef<'a> {
    /// Classify a configuration string by its scheme
    pub fn parse(value: &'a str) -> Result<Self, ResourceError> {
        if let Some(path) = value.strip_prefix(FILE_SCHEME) {
            return Ok(ResourceRef::File(path));
        }
        if let Some(data) = value.strip_prefix(DATA_SCHEME) {
            return Ok(ResourceRef::Data(data));
        }
        if let Some(rest) = value.strip_prefix(S3_SCHEME) {
            let (bucket, key) = rest
                .split_once('/')
                .ok_or_else(|| ResourceError::InvalidUri(value.to_string()))?;
            let key = key.trim_start_matches('/');
            if bucket.is_empty() || key.is_empty() {
                return Err(ResourceError::InvalidUri(value.to_string()));
            }
            return Ok(ResourceRef::Blob { bucket, key });
        }
        Ok(ResourceRef::Literal(value))
    }

    /// Whether loading this reference changes the value
    pub fn is_reference(&self) -> bool {
        !matches!(self, ResourceRef::Literal(_))
    }

    /// Where the content comes from, safe to log (inline data is not echoed)
    pub fn describe(&self) -> String {
        match self {
            ResourceRef::File(path) => format!("file {}", path),
            ResourceRef::Data(_) => "inline data".to_string(),
            ResourceRef::Blob { bucket, key } => format!("object s3://{}/{}", bucket, key),
            ResourceRef::Literal(_) => "literal value".to_string(),
        }
    }
}

/// Object storage used to resolve `s3://` references
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the full contents of an object
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ResourceError>;

    /// Get a description of this store (for logging)
    fn description(&self) -> &str {
        "blob store"
    }
}

/// Dereferences resource URIs into their byte content
#[derive(Clone, Default)]
pub struct ResourceLoader {
    blob_store: Option<Arc<dyn BlobStore>>,
}

impl ResourceLoader {
    /// Create a loader that can only resolve `file://`, `data://` and literals
    pub fn new() -> Self {
        Self { blob_store: None }
    }

    /// Attach a blob store for `s3://` references
    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    /// Load the bytes a reference points at
    pub async fn load(&self, value: &str) -> Result<Vec<u8>, ResourceError> {
        match ResourceRef::parse(value)? {
            ResourceRef::File(path) => {
                debug!(path = %path, "Loading file resource");
                tokio::fs::read(path).await.map_err(|source| ResourceError::Io {
                    path: path.to_string(),
                    source,
                })
            }
            ResourceRef::Data(data) => Ok(STANDARD.decode(data.trim())?),
            ResourceRef::Blob { bucket, key } => {
                let store = self.blob_store.as_ref().ok_or_else(|| ResourceError::NoBlobStore {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })?;
                debug!(bucket = %bucket, key = %key, store = store.description(), "Fetching blob resource");
                store.fetch(bucket, key).await
            }
            ResourceRef::Literal(literal) => Ok(literal.as_bytes().to_vec()),
        }
    }

    /// Load a reference that must hold text (PEM keys, certificates)
    pub async fn load_string(&self, value: &str) -> Result<String, ResourceError> {
        let bytes = self.load(value).await?;
        String::from_utf8(bytes).map_err(|_| ResourceError::NotUtf8 {
            origin: ResourceRef::parse(value).map(|r| r.describe()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    struct FixedBlobStore(HashMap<(String, String), Vec<u8>>);

    #[async_trait]
    impl BlobStore for FixedBlobStore {
        async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ResourceError> {
            self.0
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| ResourceError::BlobStore(format!("no such object {}/{}", bucket, key)))
        }
    }

    #[test]
    fn test_parse_schemes() {
        assert_eq!(ResourceRef::parse("file:///etc/ca.pem").unwrap(), ResourceRef::File("/etc/ca.pem"));
        assert_eq!(ResourceRef::parse("data://Zm9v").unwrap(), ResourceRef::Data("Zm9v"));
        assert_eq!(
            ResourceRef::parse("s3://my-bucket/keys/sshca.key").unwrap(),
            ResourceRef::Blob { bucket: "my-bucket", key: "keys/sshca.key" }
        );
        assert_eq!(ResourceRef::parse("plain").unwrap(), ResourceRef::Literal("plain"));
        assert!(ResourceRef::parse("s3://bucket-only").is_err());
    }

    #[tokio::test]
    async fn test_load_data_uri() {
        let loader = ResourceLoader::new();
        assert_eq!(loader.load_string("data://Zm9v").await.unwrap(), "foo");
    }

    #[tokio::test]
    async fn test_load_literal_passthrough() {
        let loader = ResourceLoader::new();
        let pem = "-----BEGIN CERTIFICATE-----\nMIIC\n-----END CERTIFICATE-----\n";
        assert_eq!(loader.load_string(pem).await.unwrap(), pem);
    }

    #[tokio::test]
    async fn test_load_file_uri() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "file-contents").unwrap();
        let uri = format!("file://{}", file.path().display());

        let loader = ResourceLoader::new();
        assert_eq!(loader.load_string(&uri).await.unwrap(), "file-contents");
    }

    #[tokio::test]
    async fn test_binary_content_names_its_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x30, 0x82, 0xff, 0xfe]).unwrap();
        let uri = format!("file://{}", file.path().display());

        let loader = ResourceLoader::new();
        assert_eq!(loader.load(&uri).await.unwrap(), vec![0x30, 0x82, 0xff, 0xfe]);

        let err = loader.load_string(&uri).await.unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, ResourceError::NotUtf8 { .. }));
        assert!(message.contains(&file.path().display().to_string()));
        assert!(message.contains("PEM"));

        let err = loader.load_string("data://MIL//g==").await.unwrap_err();
        assert!(err.to_string().starts_with("inline data"));
    }

    #[tokio::test]
    async fn test_blob_without_store_fails() {
        let loader = ResourceLoader::new();
        let result = loader.load("s3://bucket/key").await;
        assert!(matches!(result, Err(ResourceError::NoBlobStore { .. })));
    }

    #[tokio::test]
    async fn test_blob_store_fetch() {
        let mut objects = HashMap::new();
        objects.insert(("my-bucket".to_string(), "sshca.key".to_string()), b"secret".to_vec());
        let loader = ResourceLoader::new().with_blob_store(Arc::new(FixedBlobStore(objects)));

        assert_eq!(loader.load("s3://my-bucket/sshca.key").await.unwrap(), b"secret");
    }
}
