use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub sites: usize,
    pub keywords: usize,
}

/// Sorted subdirectories of `dir`.
pub(crate) fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

/// Recreate the `site/keyword` directory skeleton of `source` under
/// `destination`. Files are not copied. Safe to run repeatedly.
pub fn mirror_skeleton(source: &Path, destination: &Path) -> Result<MirrorStats> {
    std::fs::create_dir_all(destination)
        .with_context(|| format!("Failed to create {}", destination.display()))?;

    let mut stats = MirrorStats::default();
    if !source.is_dir() {
        warn!("Raw data folder {} does not exist, nothing to mirror", source.display());
        return Ok(stats);
    }

    for site in subdirs(source)? {
        let Some(site_name) = site.file_name() else { continue };
        let dest_site = destination.join(site_name);
        std::fs::create_dir_all(&dest_site)
            .with_context(|| format!("Failed to create {}", dest_site.display()))?;
        stats.sites += 1;

        for keyword in subdirs(&site)? {
            let Some(keyword_name) = keyword.file_name() else { continue };
            let dest_keyword = dest_site.join(keyword_name);
            std::fs::create_dir_all(&dest_keyword)
                .with_context(|| format!("Failed to create {}", dest_keyword.display()))?;
            stats.keywords += 1;
        }
    }

    debug!(
        "Mirrored {} sites / {} keyword folders into {}",
        stats.sites,
        stats.keywords,
        destination.display()
    );
    Ok(stats)
}
