use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::jobs::{ExecutionKey, JobSpec};

const DELIMITER: &str = " Keywords: ";

/// Persistent record of the keywords already executed per (script, link).
///
/// The backing file holds one line per key:
/// `<script> <link> Keywords: <kw1>, <kw2>, ...`
/// and is rewritten in full after every `record`.
pub struct Ledger {
    path: PathBuf,
    entries: BTreeMap<ExecutionKey, BTreeSet<String>>,
}

impl Ledger {
    /// Load the ledger at `path`. A missing file is an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read ledger {}", path.display()))?;
            parse_entries(&text)
        } else {
            debug!("No ledger at {}, starting empty", path.display());
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &BTreeMap<ExecutionKey, BTreeSet<String>> {
        &self.entries
    }

    pub fn executed(&self, key: &ExecutionKey) -> Option<&BTreeSet<String>> {
        self.entries.get(key)
    }

    /// Requested keywords not yet recorded, in configuration order.
    pub fn pending(&self, job: &JobSpec) -> Vec<String> {
        let done = self.entries.get(&job.key());
        let mut seen = HashSet::new();
        job.keywords
            .iter()
            .filter(|kw| !done.is_some_and(|set| set.contains(kw.as_str())))
            .filter(|kw| seen.insert(kw.as_str()))
            .cloned()
            .collect()
    }

    /// Mark `keyword` done for `key` and immediately rewrite the file.
    pub fn record(&mut self, key: &ExecutionKey, keyword: &str) -> Result<()> {
        self.entries
            .entry(key.clone())
            .or_default()
            .insert(keyword.to_string());
        self.persist()
    }

    /// Rewrite the whole ledger. Goes through a sibling temp file so a crash
    /// mid-write leaves the previous ledger intact.
    pub fn persist(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp ledger in {}", dir.display()))?;
        tmp.write_all(render_entries(&self.entries).as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to write ledger {}", self.path.display()))?;
        Ok(())
    }
}

fn parse_entries(text: &str) -> BTreeMap<ExecutionKey, BTreeSet<String>> {
    let mut entries = BTreeMap::new();
    for line in text.lines() {
        let Some((head, keywords)) = line.trim().split_once(DELIMITER) else {
            continue;
        };
        let head = head.trim();
        let (script, link) = match head.split_once(' ') {
            Some((script, link)) => (script.trim(), link.trim()),
            None => (head, ""),
        };
        if script.is_empty() {
            continue;
        }
        let keywords = keywords
            .trim()
            .split(", ")
            .map(str::trim)
            .filter(|kw| !kw.is_empty())
            .map(String::from);
        // A key listed twice keeps the union of its lines.
        entries
            .entry(ExecutionKey::new(script, link))
            .or_insert_with(BTreeSet::new)
            .extend(keywords);
    }
    entries
}

fn render_entries(entries: &BTreeMap<ExecutionKey, BTreeSet<String>>) -> String {
    let mut out = String::new();
    for (key, keywords) in entries {
        let joined = keywords.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
        out.push_str(&format!("{} {}{}{}\n", key.script, key.link, DELIMITER, joined));
    }
    out
}
