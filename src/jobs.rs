use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;

/// Identifies one configured scraping job: (script identifier, target link).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecutionKey {
    pub script: String,
    pub link: String,
}

impl ExecutionKey {
    pub fn new(script: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            link: link.into(),
        }
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.script, self.link)
    }
}

/// Maximum number of result pages to walk. Zero means no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageLimit(pub u32);

impl PageLimit {
    pub const UNBOUNDED: PageLimit = PageLimit(0);

    pub fn is_unbounded(self) -> bool {
        self.0 == 0
    }

    /// True when the walker, currently on `page` (1-based), may move on.
    pub fn allows_next(self, page: u32) -> bool {
        self.is_unbounded() || page < self.0
    }
}

impl fmt::Display for PageLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            f.write_str("unlimited")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub script: String,
    pub link: String,
    pub keywords: Vec<String>,
    pub page_limit: PageLimit,
}

impl JobSpec {
    pub fn key(&self) -> ExecutionKey {
        ExecutionKey::new(self.script.clone(), self.link.clone())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobsError {
    #[error("line {line}: '{text}' appears before any 'Name:' entry")]
    OrphanLine { line: usize, text: String },
    #[error("job '{script}' has no 'Link:' entry")]
    MissingLink { script: String },
    #[error("line {line}: invalid page limit '{value}'")]
    InvalidPageLimit { line: usize, value: String },
}

const NAME: &str = "Name:";
const LINK: &str = "Link:";
const PAGE_LIMIT: &str = "Limited page number:";
const KEYWORDS: &str = "Keywords:";

struct PartialJob {
    script: String,
    link: Option<String>,
    keywords: Vec<String>,
    page_limit: PageLimit,
}

impl PartialJob {
    fn finish(self) -> Result<JobSpec, JobsError> {
        let link = self.link.ok_or_else(|| JobsError::MissingLink {
            script: self.script.clone(),
        })?;
        Ok(JobSpec {
            script: self.script,
            link,
            keywords: self.keywords,
            page_limit: self.page_limit,
        })
    }
}

/// Parse the block-oriented job file. A `Name:` line opens a new job; any
/// other non-empty line after it is a keyword.
pub fn parse_jobs(text: &str) -> Result<Vec<JobSpec>, JobsError> {
    let mut jobs = Vec::new();
    let mut current: Option<PartialJob> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix(NAME) {
            if let Some(done) = current.take() {
                jobs.push(done.finish()?);
            }
            current = Some(PartialJob {
                script: name.trim().to_string(),
                link: None,
                keywords: Vec::new(),
                page_limit: PageLimit::UNBOUNDED,
            });
            continue;
        }

        let Some(job) = current.as_mut() else {
            return Err(JobsError::OrphanLine {
                line: idx + 1,
                text: line.to_string(),
            });
        };

        if let Some(link) = line.strip_prefix(LINK) {
            job.link = Some(link.trim().to_string());
        } else if let Some(value) = line.strip_prefix(PAGE_LIMIT) {
            let value = value.trim();
            let limit = value.parse::<u32>().map_err(|_| JobsError::InvalidPageLimit {
                line: idx + 1,
                value: value.to_string(),
            })?;
            job.page_limit = PageLimit(limit);
        } else if line.starts_with(KEYWORDS) {
            continue;
        } else {
            job.keywords.push(line.to_string());
        }
    }

    if let Some(done) = current {
        jobs.push(done.finish()?);
    }
    Ok(jobs)
}

pub fn load_jobs(path: &Path) -> Result<Vec<JobSpec>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    let jobs = parse_jobs(&text).with_context(|| format!("Invalid job file {}", path.display()))?;
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Name: eur_lexWebScraping.py
Link: https://eur-lex.europa.eu/homepage.html
Limited page number: 3
Keywords:
glass
soda ash

Name: echaWebScraping.py
Link: https://echa.europa.eu/search
Limited page number: 0
Keywords:
boron
";

    #[test]
    fn parses_blocks() {
        let jobs = parse_jobs(SAMPLE).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].script, "eur_lexWebScraping.py");
        assert_eq!(jobs[0].link, "https://eur-lex.europa.eu/homepage.html");
        assert_eq!(jobs[0].keywords, vec!["glass", "soda ash"]);
        assert_eq!(jobs[0].page_limit, PageLimit(3));
        assert_eq!(jobs[1].keywords, vec!["boron"]);
        assert!(jobs[1].page_limit.is_unbounded());
    }

    #[test]
    fn missing_limit_is_unbounded() {
        let jobs = parse_jobs("Name: echa\nLink: https://x\nKeywords:\nlead\n").unwrap();
        assert_eq!(jobs[0].page_limit, PageLimit::UNBOUNDED);
    }

    #[test]
    fn missing_link_is_an_error() {
        let err = parse_jobs("Name: echa\nKeywords:\nlead\n").unwrap_err();
        assert_eq!(err, JobsError::MissingLink { script: "echa".into() });
    }

    #[test]
    fn bad_page_limit() {
        let err = parse_jobs("Name: echa\nLink: x\nLimited page number: many\n").unwrap_err();
        assert!(matches!(err, JobsError::InvalidPageLimit { line: 3, .. }));
    }

    #[test]
    fn keyword_before_name() {
        let err = parse_jobs("glass\nName: echa\n").unwrap_err();
        assert!(matches!(err, JobsError::OrphanLine { line: 1, .. }));
    }

    #[test]
    fn page_limit_walk() {
        assert!(PageLimit(2).allows_next(1));
        assert!(!PageLimit(2).allows_next(2));
        assert!(PageLimit::UNBOUNDED.allows_next(10_000));
    }
}
