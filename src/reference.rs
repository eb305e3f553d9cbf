//! References into an OCI layout.

use std::fmt;

use crate::util::clean_path;

/// The tag looked up when a reference names neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

/// Identifies a layout directory and, optionally, one entry of its index.
///
/// `path` names the layout root relative to the filesystem backend.  An entry
/// is selected by `digest` when one is given, otherwise by `tag`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reference {
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl Reference {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Parses `dir[:tag][@digest]`.
    ///
    /// A colon only separates a tag when it comes after the last slash, so
    /// directories containing colons still work.
    pub fn parse(s: &str) -> Self {
        let (rest, digest) = match s.rsplit_once('@') {
            Some((rest, digest)) if !digest.is_empty() => (rest, Some(digest.to_string())),
            _ => (s, None),
        };
        let name_start = rest.rfind('/').map_or(0, |pos| pos + 1);
        let (path, tag) = match rest[name_start..].rfind(':') {
            Some(pos) => {
                let (path, tag) = rest.split_at(name_start + pos);
                (path, Some(tag[1..].to_string()).filter(|t| !t.is_empty()))
            }
            None => (rest, None),
        };
        Self {
            path: path.to_string(),
            tag,
            digest,
        }
    }

    /// The normalized layout path, used as the key for per-path state.
    pub fn path_key(&self) -> String {
        clean_path(&self.path)
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref().filter(|t| !t.is_empty())
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref().filter(|d| !d.is_empty())
    }

    /// The tag used for lookups: the reference tag, or [`DEFAULT_TAG`] when
    /// neither a tag nor a digest is set.
    pub fn lookup_tag(&self) -> Option<&str> {
        match (self.tag(), self.digest()) {
            (Some(tag), _) => Some(tag),
            (None, None) => Some(DEFAULT_TAG),
            (None, Some(_)) => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if let Some(tag) = self.tag() {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = self.digest() {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
