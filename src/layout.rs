use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// The per-record files a scraper produces. Order of `ALL` is the order in
/// which grouped files are written into an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Text,
    Document,
    Table,
    Metadata,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Text,
        ArtifactKind::Document,
        ArtifactKind::Table,
        ArtifactKind::Metadata,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Text => "text",
            ArtifactKind::Document => "pdf",
            ArtifactKind::Table => "json",
            ArtifactKind::Metadata => "metadata",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Text => "txt",
            ArtifactKind::Document => "pdf",
            ArtifactKind::Table | ArtifactKind::Metadata => "json",
        }
    }

    /// Canonical file name written for `key`.
    pub fn file_name(self, key: &str) -> String {
        match self {
            ArtifactKind::Metadata => format!("metadata_{}.{}", key, self.extension()),
            _ => format!("{}.{}", key, self.extension()),
        }
    }

    /// File names probed when regrouping; metadata also accepts the bare key.
    pub fn candidates(self, key: &str) -> Vec<String> {
        match self {
            ArtifactKind::Metadata => vec![
                self.file_name(key),
                format!("{}.{}", key, self.extension()),
            ],
            _ => vec![self.file_name(key)],
        }
    }
}

/// Folder name used for a keyword: colons dropped, spaces to underscores.
pub fn keyword_dir_name(keyword: &str) -> String {
    keyword.replace(':', "").replace(' ', "_")
}

/// Distinct keywords that map to the same folder, as (first, later) pairs.
/// Their artifacts land in one place and can overwrite each other.
pub fn shared_keyword_dirs<'a>(
    keywords: impl IntoIterator<Item = &'a str>,
) -> Vec<(&'a str, &'a str)> {
    let mut owners: HashMap<String, &str> = HashMap::new();
    let mut shared = Vec::new();
    for keyword in keywords {
        match owners.entry(keyword_dir_name(keyword)) {
            Entry::Occupied(e) if *e.get() != keyword => shared.push((*e.get(), keyword)),
            Entry::Occupied(_) => {}
            Entry::Vacant(e) => {
                e.insert(keyword);
            }
        }
    }
    shared
}

/// `<raw_root>/<site>/<keyword>` and its four artifact subfolders.
#[derive(Debug, Clone)]
pub struct KeywordLayout {
    root: PathBuf,
}

impl KeywordLayout {
    pub fn new(raw_root: &Path, site_dir: &str, keyword: &str) -> Self {
        Self {
            root: raw_root.join(site_dir).join(keyword_dir_name(keyword)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn path(&self, kind: ArtifactKind, key: &str) -> PathBuf {
        self.dir(kind).join(kind.file_name(key))
    }

    pub fn create_all(&self) -> Result<()> {
        for kind in ArtifactKind::ALL {
            let dir = self.dir(kind);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
