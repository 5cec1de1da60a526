use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, info_span, warn, Instrument};

use crate::bundler::{bundle_groups, BundleStats};
use crate::grouper::group_records;
use crate::jobs::JobSpec;
use crate::layout::{keyword_dir_name, shared_keyword_dirs};
use crate::ledger::Ledger;
use crate::mirror::{mirror_skeleton, MirrorStats};
use crate::sites::ScraperRegistry;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Jobs whose every keyword was already recorded.
    pub already_done: usize,
    /// Jobs naming a script no scraper handles.
    pub unknown: usize,
    pub keywords_run: usize,
    pub found: usize,
    pub saved: usize,
    pub errors: usize,
}

/// Run every keyword not yet in the ledger, one at a time, recording each
/// as soon as its scraper returns.
///
/// A scraper error (the browser session could not start) aborts the run;
/// keywords finished before it stay recorded.
pub async fn run_jobs(
    jobs: &[JobSpec],
    ledger: &mut Ledger,
    registry: &impl ScraperRegistry,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    warn_shared_folders(jobs);

    for job in jobs {
        let key = job.key();
        let pending = ledger.pending(job);
        if pending.is_empty() {
            info!("All keywords for {} have already been executed", key);
            summary.already_done += 1;
            continue;
        }

        let Some(scraper) = registry.scraper_for(&job.script, &job.link) else {
            warn!("No scraper for '{}', skipping {}", job.script, job.link);
            summary.unknown += 1;
            continue;
        };

        info!(
            "Running {} for {} keywords (page limit {})",
            key,
            pending.len(),
            job.page_limit
        );
        for keyword in &pending {
            let span = info_span!("keyword", script = %job.script, keyword = %keyword);
            let stats = scraper
                .run(keyword, job.page_limit)
                .instrument(span)
                .await
                .with_context(|| format!("Scraper {} failed on '{}'", job.script, keyword))?;
            ledger.record(&key, keyword)?;

            summary.keywords_run += 1;
            summary.found += stats.found;
            summary.saved += stats.saved;
            summary.errors += stats.errors;
        }
    }

    Ok(summary)
}

/// Keywords of one script whose folder names coincide write into the same
/// place; say so before anything runs.
fn warn_shared_folders(jobs: &[JobSpec]) {
    let mut by_script: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for job in jobs {
        by_script
            .entry(job.script.as_str())
            .or_default()
            .extend(job.keywords.iter().map(String::as_str));
    }
    for (script, keywords) in by_script {
        for (first, later) in shared_keyword_dirs(keywords) {
            warn!(
                "{}: keywords '{}' and '{}' share folder {}",
                script,
                first,
                later,
                keyword_dir_name(later)
            );
        }
    }
}

#[derive(Debug)]
pub struct PackageSummary {
    pub mirror: MirrorStats,
    pub groups: usize,
    pub archives: BundleStats,
}

/// Mirror the raw tree, group its records and write one archive per group.
pub fn package(raw_root: &Path, processed_root: &Path) -> Result<PackageSummary> {
    let mirror = mirror_skeleton(raw_root, processed_root)?;
    let groups = group_records(raw_root, processed_root)?;
    let archives = bundle_groups(&groups);
    Ok(PackageSummary {
        mirror,
        groups: groups.len(),
        archives,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{ExecutionKey, PageLimit};
    use crate::sites::{ScrapeStats, Scraper};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    type Calls = Arc<Mutex<Vec<(String, String)>>>;

    struct FakeScraper {
        script: String,
        calls: Calls,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl Scraper for FakeScraper {
        async fn run(&self, keyword: &str, _limit: PageLimit) -> Result<ScrapeStats> {
            if self.fail_on.as_deref() == Some(keyword) {
                anyhow::bail!("session not created");
            }
            self.calls
                .lock()
                .unwrap()
                .push((self.script.clone(), keyword.to_string()));
            Ok(ScrapeStats {
                found: 2,
                saved: 1,
                errors: 1,
            })
        }
    }

    #[derive(Default)]
    struct FakeRegistry {
        calls: Calls,
        fail_on: Option<String>,
    }

    impl FakeRegistry {
        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ScraperRegistry for FakeRegistry {
        fn scraper_for(&self, script: &str, _link: &str) -> Option<Box<dyn Scraper>> {
            if script == "unknown.py" {
                return None;
            }
            Some(Box::new(FakeScraper {
                script: script.to_string(),
                calls: self.calls.clone(),
                fail_on: self.fail_on.clone(),
            }))
        }
    }

    fn job(script: &str, keywords: &[&str]) -> JobSpec {
        JobSpec {
            script: script.to_string(),
            link: format!("https://{}.example/search", script),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            page_limit: PageLimit(2),
        }
    }

    #[tokio::test]
    async fn second_run_does_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("executed.txt");
        let jobs = vec![job("echa", &["boron", "lead"]), job("eur_lex", &["soda ash"])];

        let registry = FakeRegistry::default();
        let mut ledger = Ledger::load(&path).unwrap();
        let first = run_jobs(&jobs, &mut ledger, &registry).await.unwrap();
        assert_eq!(first.keywords_run, 3);
        assert_eq!(first.found, 6);
        assert_eq!(
            registry.calls(),
            vec![
                ("echa".to_string(), "boron".to_string()),
                ("echa".to_string(), "lead".to_string()),
                ("eur_lex".to_string(), "soda ash".to_string()),
            ]
        );

        let registry = FakeRegistry::default();
        let mut ledger = Ledger::load(&path).unwrap();
        let second = run_jobs(&jobs, &mut ledger, &registry).await.unwrap();
        assert!(registry.calls().is_empty());
        assert_eq!(second.already_done, 2);
        assert_eq!(second.keywords_run, 0);
    }

    #[tokio::test]
    async fn only_new_keywords_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("executed.txt");
        let registry = FakeRegistry::default();

        let mut ledger = Ledger::load(&path).unwrap();
        run_jobs(&[job("echa", &["boron"])], &mut ledger, &registry)
            .await
            .unwrap();
        run_jobs(&[job("echa", &["boron", "lead"])], &mut ledger, &registry)
            .await
            .unwrap();

        let keywords: Vec<_> = registry.calls().into_iter().map(|(_, k)| k).collect();
        assert_eq!(keywords, vec!["boron", "lead"]);
    }

    #[tokio::test]
    async fn unknown_script_is_skipped() {
        let dir = tempdir().unwrap();
        let registry = FakeRegistry::default();
        let mut ledger = Ledger::load(dir.path().join("executed.txt")).unwrap();

        let summary = run_jobs(
            &[job("unknown.py", &["boron"]), job("echa", &["boron"])],
            &mut ledger,
            &registry,
        )
        .await
        .unwrap();

        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.keywords_run, 1);
        let unknown = ExecutionKey::new("unknown.py", "https://unknown.py.example/search");
        assert!(ledger.executed(&unknown).is_none());
    }

    #[tokio::test]
    async fn failure_keeps_earlier_keywords_recorded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("executed.txt");
        let registry = FakeRegistry {
            fail_on: Some("lead".to_string()),
            ..Default::default()
        };
        let jobs = vec![job("echa", &["boron", "lead", "zinc"])];

        let mut ledger = Ledger::load(&path).unwrap();
        assert!(run_jobs(&jobs, &mut ledger, &registry).await.is_err());

        let reloaded = Ledger::load(&path).unwrap();
        let done = reloaded.executed(&jobs[0].key()).unwrap();
        assert!(done.contains("boron"));
        assert!(!done.contains("lead"));
        assert!(!done.contains("zinc"));
    }

    #[test]
    fn package_builds_archives() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("raw");
        let processed = dir.path().join("processed");
        let keyword = raw.join("eur_lex").join("soda_ash");
        std::fs::create_dir_all(keyword.join("text")).unwrap();
        std::fs::create_dir_all(keyword.join("metadata")).unwrap();
        std::fs::write(keyword.join("text/2020-01-01-Doc.txt"), "summary").unwrap();
        std::fs::write(keyword.join("metadata/metadata_2020-01-01-Doc.json"), "{}").unwrap();

        let summary = package(&raw, &processed).unwrap();
        assert_eq!(summary.mirror, MirrorStats { sites: 1, keywords: 1 });
        assert_eq!(summary.groups, 1);
        assert_eq!(summary.archives.written, 1);
        assert!(processed.join("eur_lex/soda_ash/2020-01-01-Doc.zip").is_file());
    }
}
