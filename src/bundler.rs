use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::grouper::Group;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("cannot open {}: {source}", path.display())]
    MissingInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} has no usable file name", path.display())]
    BadName { path: PathBuf },
    #[error("cannot move archive into {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BundleStats {
    pub written: usize,
    pub failed: usize,
}

fn member_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Write `destination/archive_name` as a deflate zip holding `paths`, each
/// stored under its bare file name in the given order.
///
/// The archive is built in a temp file next to the target and renamed into
/// place only once complete. Any failure leaves no archive behind. An
/// existing archive with the same name is replaced.
pub fn compress(
    paths: &[PathBuf],
    destination: &Path,
    archive_name: &str,
) -> Result<PathBuf, BundleError> {
    let target = destination.join(archive_name);
    let mut tmp = NamedTempFile::new_in(destination)?;

    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        for path in paths {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| BundleError::BadName { path: path.clone() })?;
            let mut input = File::open(path).map_err(|source| BundleError::MissingInput {
                path: path.clone(),
                source,
            })?;
            zip.start_file(name, member_options())?;
            io::copy(&mut input, &mut zip)?;
        }
        zip.finish()?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(&target).map_err(|e| BundleError::Persist {
        path: target.clone(),
        source: e.error,
    })?;
    Ok(target)
}

/// One archive per group. A failing group is logged and skipped.
pub fn bundle_groups(groups: &[Group]) -> BundleStats {
    let pb = ProgressBar::new(groups.len() as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} archives")
    {
        pb.set_style(style.progress_chars("=> "));
    }

    let mut stats = BundleStats { written: 0, failed: 0 };
    for group in groups {
        match compress(&group.paths, &group.destination, &group.archive_name()) {
            Ok(_) => stats.written += 1,
            Err(e) => {
                warn!("Skipping archive {}: {}", group.key, e);
                stats.failed += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Wrote {} archives ({} failed)", stats.written, stats.failed);
    stats
}
