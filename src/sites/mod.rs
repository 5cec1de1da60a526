pub mod artifacts;
pub mod browser;
mod echa;
mod eur_lex;
mod resmi_gazete;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use reqwest::Url;
use thirtyfour::WebDriver;
use tracing::{info, warn};

use crate::jobs::PageLimit;
use crate::layout::KeywordLayout;
use artifacts::ArtifactStore;
use browser::BrowserSettings;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\*?"<>|\x00-\x1f]"#).unwrap());

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// A directly downloadable file (PDF).
    Document,
    /// An HTML page: summarised, and mined for tables.
    Page,
}

/// One search hit, before its content is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub url: String,
    /// Normalised `YYYY-MM-DD`.
    pub date: String,
    pub name: String,
    pub description: String,
    pub kind: ContentKind,
    /// Logical group key shared by every file written for this hit.
    pub key: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeStats {
    pub found: usize,
    pub saved: usize,
    pub errors: usize,
}

/// Something that can scrape one keyword into the raw-data area.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn run(&self, keyword: &str, limit: PageLimit) -> Result<ScrapeStats>;
}

/// Resolves a configured script identifier to a scraper.
pub trait ScraperRegistry {
    fn scraper_for(&self, script: &str, link: &str) -> Option<Box<dyn Scraper>>;
}

// ── Sites ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Echa,
    EurLex,
    ResmiGazete,
}

impl Site {
    pub const ALL: [Site; 3] = [Site::Echa, Site::EurLex, Site::ResmiGazete];

    /// Identifiers accepted in the job file for this site.
    pub fn identifiers(self) -> &'static [&'static str] {
        match self {
            Site::Echa => &["echaWebScraping.py", "echa"],
            Site::EurLex => &["eur_lexWebScraping.py", "eur_lex", "eurlex"],
            Site::ResmiGazete => &[
                "resmiWebScraping.py",
                "resmigazeteWebScraper1.py",
                "resmigazete",
                "resmi_gazete",
            ],
        }
    }

    pub fn from_identifier(id: &str) -> Option<Site> {
        let id = id.trim();
        Site::ALL
            .into_iter()
            .find(|site| site.identifiers().iter().any(|known| known.eq_ignore_ascii_case(id)))
    }

    /// Folder under the raw-data root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Site::Echa => "ECHA",
            Site::EurLex => "eur_lex",
            Site::ResmiGazete => "resmigazete",
        }
    }

    /// How many characters of the display name go into the group key.
    fn key_name_chars(self) -> Option<usize> {
        match self {
            Site::Echa => None,
            Site::EurLex | Site::ResmiGazete => Some(20),
        }
    }

    async fn walk(self, cx: &WalkContext<'_>, out: &mut Vec<RawRecord>) -> Result<()> {
        match self {
            Site::Echa => echa::walk(cx, out).await,
            Site::EurLex => eur_lex::walk(cx, out).await,
            Site::ResmiGazete => resmi_gazete::walk(cx, out).await,
        }
    }
}

/// Everything a site walker needs for one keyword.
pub(crate) struct WalkContext<'a> {
    pub driver: &'a WebDriver,
    pub base_url: &'a str,
    pub keyword: &'a str,
    pub limit: PageLimit,
    pub browser: &'a BrowserSettings,
    pub site: Site,
}

impl WalkContext<'_> {
    pub fn key_for(&self, keys: &mut KeyAllocator, date: &str, name: &str) -> String {
        keys.allocate(derive_key(date, name, self.site.key_name_chars()))
    }

    pub fn absolute(&self, link: &str) -> String {
        absolute_url(self.base_url, link)
    }
}

// ── Keys, dates, links ──

/// `<date>-<name>` made safe for use as a file stem.
pub fn derive_key(date: &str, name: &str, name_chars: Option<usize>) -> String {
    let name = name.trim();
    let name: String = match name_chars {
        Some(n) => name.chars().take(n).collect(),
        None => name.to_string(),
    };
    let raw = format!("{}-{}", date, name.trim_end())
        .replace('/', "_")
        .replace(':', "")
        .replace(' ', "_");
    UNSAFE_CHARS.replace_all(&raw, "_").into_owned()
}

/// Hands out unique keys, suffixing `-1`, `-2`, ... on exact collisions.
#[derive(Debug, Default)]
pub struct KeyAllocator {
    used: HashSet<String>,
}

impl KeyAllocator {
    pub fn allocate(&mut self, base: String) -> String {
        if self.used.insert(base.clone()) {
            return base;
        }
        let mut counter = 1u32;
        loop {
            let candidate = format!("{}-{}", base, counter);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Turn a listing date (`DD/MM/YYYY`, `DD/MM/YY`, `DD.MM.YYYY`, optionally
/// followed by `; annotation`) into `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let head = raw.split(';').next()?.trim();
    let parts: Vec<&str> = head.split(['/', '.', '-']).map(str::trim).collect();
    let [day, month, year] = parts.as_slice() else {
        return None;
    };
    let day: u32 = day.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let mut year_num: i32 = year.parse().ok()?;
    if year.len() == 2 {
        year_num += 2000;
    }
    let date = NaiveDate::from_ymd_opt(year_num, month, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

pub fn absolute_url(base: &str, link: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(link))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| link.to_string())
}

/// Document links end in `.pdf`, or carry it in the segment before a
/// trailing version id (`.../file.pdf/<uuid>`).
pub fn looks_like_document(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let mut segments = path.rsplit('/');
    let last = segments.next().unwrap_or_default().to_ascii_lowercase();
    let before = segments.next().unwrap_or_default().to_ascii_lowercase();
    last.ends_with(".pdf") || before.ends_with(".pdf")
}

// ── Production scraper ──

/// Browser-driven scraper for one configured (site, link).
pub struct SiteScraper {
    site: Site,
    base_url: String,
    raw_root: PathBuf,
    browser: BrowserSettings,
    http: reqwest::Client,
}

impl SiteScraper {
    async fn fetch_and_store(&self, store: &ArtifactStore, record: &RawRecord) -> Result<()> {
        let response = self
            .http
            .get(&record.url)
            .send()
            .await?
            .error_for_status()?;
        match record.kind {
            ContentKind::Document => {
                let bytes = response.bytes().await?;
                store.save_document(record, &bytes)?;
            }
            ContentKind::Page => {
                let html = response.text().await?;
                store.save_summary(record)?;
                store.save_tables(record, &html)?;
            }
        }
        store.save_metadata(record)?;
        Ok(())
    }
}

#[async_trait]
impl Scraper for SiteScraper {
    async fn run(&self, keyword: &str, limit: PageLimit) -> Result<ScrapeStats> {
        let layout = KeywordLayout::new(&self.raw_root, self.site.dir_name(), keyword);
        layout.create_all()?;

        let driver = browser::start(&self.browser).await?;
        let cx = WalkContext {
            driver: &driver,
            base_url: &self.base_url,
            keyword,
            limit,
            browser: &self.browser,
            site: self.site,
        };
        let mut records = Vec::new();
        if let Err(e) = self.site.walk(&cx, &mut records).await {
            warn!("Search for '{}' stopped early: {:#}", keyword, e);
        }
        if let Err(e) = driver.quit().await {
            warn!("Failed to close browser session: {}", e);
        }

        let store = ArtifactStore::new(layout, keyword);
        let mut stats = ScrapeStats {
            found: records.len(),
            ..Default::default()
        };
        for record in &records {
            match self.fetch_and_store(&store, record).await {
                Ok(()) => stats.saved += 1,
                Err(e) => {
                    warn!("Error at {}: {:#}", record.url, e);
                    stats.errors += 1;
                }
            }
        }

        info!(
            "{} results for '{}' ({} saved, {} errors) in {}",
            stats.found,
            keyword,
            stats.saved,
            stats.errors,
            store.layout().root().display()
        );
        Ok(stats)
    }
}

/// The closed set of production scrapers.
pub struct SiteRegistry {
    raw_root: PathBuf,
    browser: BrowserSettings,
    http: reqwest::Client,
}

impl SiteRegistry {
    pub fn new(raw_root: PathBuf, browser: BrowserSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            raw_root,
            browser,
            http,
        })
    }
}

impl ScraperRegistry for SiteRegistry {
    fn scraper_for(&self, script: &str, link: &str) -> Option<Box<dyn Scraper>> {
        let site = Site::from_identifier(script)?;
        Some(Box::new(SiteScraper {
            site,
            base_url: link.to_string(),
            raw_root: self.raw_root.clone(),
            browser: self.browser.clone(),
            http: self.http.clone(),
        }))
    }
}
