//! Sectioned key/value profile store
//!
//! Splits a credentials file into raw sections so that writing one profile
//! leaves every other byte of the file exactly as it was. Only enough of the
//! format is understood to find section boundaries and reject files that
//! are not sectioned key/value text.

use crate::error::WriteError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    /// Header line through the line before the next header, verbatim
    raw: String,
}

/// A parsed profile store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileStore {
    /// Blank and comment lines before the first section
    preamble: String,
    sections: Vec<Section>,
}

impl ProfileStore {
    /// Parse existing store contents
    pub fn parse(text: &str) -> Result<Self, WriteError> {
        let mut store = ProfileStore::default();

        for (index, line) in text.split_inclusive('\n').enumerate() {
            let line_no = index + 1;
            let content = line.trim();

            if content.starts_with('[') {
                let name = section_name(content).ok_or_else(|| WriteError::Malformed {
                    line: line_no,
                    reason: format!("invalid section header '{}'", content),
                })?;
                store.sections.push(Section {
                    name: name.to_string(),
                    raw: line.to_string(),
                });
                continue;
            }

            let is_trivia = content.is_empty() || content.starts_with('#') || content.starts_with(';');
            match store.sections.last_mut() {
                Some(section) => {
                    if !is_trivia && !content.contains('=') {
                        return Err(WriteError::Malformed {
                            line: line_no,
                            reason: "expected 'key = value'".into(),
                        });
                    }
                    section.raw.push_str(line);
                }
                None if is_trivia => store.preamble.push_str(line),
                None => {
                    return Err(WriteError::Malformed {
                        line: line_no,
                        reason: "setting outside of any section".into(),
                    })
                }
            }
        }

        Ok(store)
    }

    /// Section names in file order
    pub fn profile_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.name == name)
    }

    /// Raw text of a section, header included
    pub fn section_text(&self, name: &str) -> Option<&str> {
        self.sections.iter().find(|s| s.name == name).map(|s| s.raw.as_str())
    }

    /// Write a rendered section under `name`
    ///
    /// An existing section of that name is replaced in place and any later
    /// duplicates are dropped; otherwise the section is appended.
    pub fn upsert(&mut self, name: &str, rendered: String) {
        match self.sections.iter().position(|s| s.name == name) {
            Some(first) => {
                self.sections[first].raw = rendered;
                let mut index = 0;
                self.sections.retain(|s| {
                    let keep = index <= first || s.name != name;
                    index += 1;
                    keep
                });
            }
            None => {
                if let Some(last) = self.sections.last_mut() {
                    if !last.raw.ends_with('\n') {
                        last.raw.push('\n');
                    }
                } else if !self.preamble.is_empty() && !self.preamble.ends_with('\n') {
                    self.preamble.push('\n');
                }
                self.sections.push(Section {
                    name: name.to_string(),
                    raw: rendered,
                });
            }
        }
    }

    /// Serialize the store
    pub fn render(&self) -> String {
        let mut out = self.preamble.clone();
        for section in &self.sections {
            out.push_str(&section.raw);
        }
        out
    }
}

/// Name in a `[name]` header; a trailing `;` or `#` comment is allowed
fn section_name(header: &str) -> Option<&str> {
    let (name, rest) = header.strip_prefix('[')?.split_once(']')?;
    let rest = rest.trim_start();
    if !(rest.is_empty() || rest.starts_with(';') || rest.starts_with('#')) {
        return None;
    }
    let name = name.trim();
    (!name.is_empty()).then_some(name)
}
