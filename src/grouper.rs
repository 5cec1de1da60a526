use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::layout::ArtifactKind;
use crate::mirror::subdirs;

/// All files belonging to one logical record, and where its archive goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub key: String,
    /// Ordered text, document, table, metadata; absent kinds are skipped.
    pub paths: Vec<PathBuf>,
    pub destination: PathBuf,
}

impl Group {
    pub fn archive_name(&self) -> String {
        format!("{}.zip", self.key)
    }
}

/// Walk `raw_root/<site>/<keyword>` and build one group per text summary.
///
/// Keys come from the file stems under `text/`; a record that never got a
/// summary is not grouped even if its document exists. Each keyword's
/// destination `processed_root/<site>/<keyword>` is created on the way.
pub fn group_records(raw_root: &Path, processed_root: &Path) -> Result<Vec<Group>> {
    let mut groups = Vec::new();
    if !raw_root.is_dir() {
        return Ok(groups);
    }

    for site in subdirs(raw_root)? {
        let Some(site_name) = site.file_name() else { continue };
        for keyword in subdirs(&site)? {
            let Some(keyword_name) = keyword.file_name() else { continue };
            let destination = processed_root.join(site_name).join(keyword_name);
            std::fs::create_dir_all(&destination)
                .with_context(|| format!("Failed to create {}", destination.display()))?;
            let found = group_keyword(&keyword, &destination)?;
            debug!("{} groups in {}", found.len(), keyword.display());
            groups.extend(found);
        }
    }

    info!("Grouped {} records under {}", groups.len(), raw_root.display());
    Ok(groups)
}

/// Groups for a single keyword folder.
pub fn group_keyword(keyword_dir: &Path, destination: &Path) -> Result<Vec<Group>> {
    let text_dir = keyword_dir.join(ArtifactKind::Text.dir_name());
    if !text_dir.is_dir() {
        debug!("No text folder in {}, skipping", keyword_dir.display());
        return Ok(Vec::new());
    }

    let mut keys = Vec::new();
    for entry in std::fs::read_dir(&text_dir)
        .with_context(|| format!("Failed to list {}", text_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
            keys.push(stem.to_string());
        }
    }
    keys.sort();
    keys.dedup();

    Ok(keys
        .into_iter()
        .map(|key| Group {
            paths: probe_artifacts(keyword_dir, &key),
            key,
            destination: destination.to_path_buf(),
        })
        .collect())
}

fn probe_artifacts(keyword_dir: &Path, key: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for kind in ArtifactKind::ALL {
        let dir = keyword_dir.join(kind.dir_name());
        if let Some(found) = kind
            .candidates(key)
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
        {
            paths.push(found);
        }
    }
    paths
}
