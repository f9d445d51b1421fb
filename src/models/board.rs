use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A board namespace such as `/b/`. Threads and posts are keyed within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Board {
    name: String,
}

impl Board {
    /// Board names end up in URLs and directory names, so only short
    /// alphanumeric slugs are accepted.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 32
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(AppError::Config(format!("invalid board name {:?}", name)));
        }
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}/", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub board: String,
    pub number: i64,
    pub subject: String,
    pub timestamp: i64,
    pub views: i64,
    pub unique_posters: i64,
    pub processed: bool,
}

impl Thread {
    /// Only the counters are mutable once a thread is stored; subject and
    /// timestamp are fixed at creation.
    pub fn counters_match(&self, other: &Thread) -> bool {
        self.views == other.views && self.unique_posters == other.unique_posters
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub board: String,
    /// Number of the owning thread. Equal to `number` for the opening post.
    pub thread: i64,
    pub number: i64,
    pub index: i64,
    pub timestamp: i64,
    pub op: bool,
    pub message: String,
    pub files: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub path: String,
    #[serde(rename = "md5", default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: i64,
}

/// A plain hex digest such as an MD5 sum. Anything else is not trusted as a
/// file name or ledger key.
pub fn is_content_hash(value: &str) -> bool {
    !value.is_empty() && value.len() <= 128 && value.chars().all(|c| c.is_ascii_hexdigit())
}

impl Attachment {
    /// The remote hash, if it is a usable hex digest.
    pub fn content_hash(&self) -> Option<&str> {
        self.hash.as_deref().filter(|h| is_content_hash(h))
    }

    /// File name used on disk: the content hash plus the remote extension,
    /// so two different files sharing a remote name never overwrite each other.
    pub fn storage_name(&self) -> Option<String> {
        let hash = self.content_hash()?;
        let ext = std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()));
        Some(match ext {
            Some(ext) => format!("{}.{}", hash, ext.to_ascii_lowercase()),
            None => hash.to_string(),
        })
    }
}

/// Posts fetched for a single thread, already normalized.
#[derive(Debug, Clone, Default)]
pub struct ThreadPosts {
    pub posts: Vec<Post>,
    pub unique_posters: i64,
    pub rejected: usize,
}

impl ThreadPosts {
    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.posts.iter().flat_map(|p| p.files.iter())
    }
}
