use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RawRecord;
use crate::layout::{ArtifactKind, KeywordLayout};

static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static HEADER_CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").unwrap());
static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static DATA_CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());

/// Sidecar JSON written for every saved record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub notified_date: String,
    pub notified_country: Option<String>,
    #[serde(rename = "URL")]
    pub url: String,
    pub keyword: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Tables that have both header cells and at least one data row.
pub fn extract_tables(html: &str) -> Vec<Table> {
    let document = Html::parse_document(html);
    document
        .select(&TABLE)
        .filter_map(|table| {
            let headers: Vec<String> = table.select(&HEADER_CELL).map(cell_text).collect();
            let rows: Vec<Vec<String>> = table
                .select(&ROW)
                .map(|row| row.select(&DATA_CELL).map(cell_text).collect::<Vec<_>>())
                .filter(|cells| !cells.is_empty())
                .collect();
            (!headers.is_empty() && !rows.is_empty()).then_some(Table { headers, rows })
        })
        .collect()
}

pub fn summary_text(record: &RawRecord, keyword: &str) -> String {
    format!(
        "Title: {}\nDistribution date: {}\nKeywords: {}\nSummary: {}\n",
        record.name, record.date, keyword, record.description
    )
}

/// Writes the per-record files for one keyword folder.
pub struct ArtifactStore {
    layout: KeywordLayout,
    keyword: String,
}

impl ArtifactStore {
    pub fn new(layout: KeywordLayout, keyword: &str) -> Self {
        Self {
            layout,
            keyword: keyword.to_string(),
        }
    }

    pub fn layout(&self) -> &KeywordLayout {
        &self.layout
    }

    fn write(&self, kind: ArtifactKind, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.layout.path(kind, key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Saved {}", path.display());
        Ok(path)
    }

    pub fn save_document(&self, record: &RawRecord, bytes: &[u8]) -> Result<PathBuf> {
        self.write(ArtifactKind::Document, &record.key, bytes)
    }

    pub fn save_summary(&self, record: &RawRecord) -> Result<PathBuf> {
        let text = summary_text(record, &self.keyword);
        self.write(ArtifactKind::Text, &record.key, text.as_bytes())
    }

    /// Returns `None` when the page holds no usable table.
    pub fn save_tables(&self, record: &RawRecord, html: &str) -> Result<Option<PathBuf>> {
        let tables = extract_tables(html);
        if tables.is_empty() {
            return Ok(None);
        }
        let json = serde_json::to_vec_pretty(&tables)?;
        self.write(ArtifactKind::Table, &record.key, &json).map(Some)
    }

    pub fn save_metadata(&self, record: &RawRecord) -> Result<PathBuf> {
        let metadata = Metadata {
            name: record.name.clone(),
            notified_date: record.date.clone(),
            notified_country: None,
            url: record.url.clone(),
            keyword: self.keyword.clone(),
        };
        let json = serde_json::to_vec_pretty(&metadata)?;
        self.write(ArtifactKind::Metadata, &record.key, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::ContentKind;
    use std::path::Path;
    use tempfile::tempdir;

    fn read_metadata(path: &Path) -> Metadata {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn record() -> RawRecord {
        RawRecord {
            url: "https://eur-lex.europa.eu/legal-content/EN/TXT/?uri=CELEX:32020R0001".into(),
            date: "2020-01-01".into(),
            name: "Regulation 2020/1".into(),
            description: "Commission Regulation on soda ash".into(),
            kind: ContentKind::Page,
            key: "2020-01-01-Regulation_2020_1".into(),
        }
    }

    #[test]
    fn tables_need_headers_and_rows() {
        let html = r#"
            <table><tr><th>Substance</th><th>CAS</th></tr>
                   <tr><td> Boron </td><td>7440-42-8</td></tr></table>
            <table><tr><td>no header</td></tr></table>
            <table><tr><th>header only</th></tr></table>"#;
        let tables = extract_tables(html);
        assert_eq!(
            tables,
            vec![Table {
                headers: vec!["Substance".into(), "CAS".into()],
                rows: vec![vec!["Boron".into(), "7440-42-8".into()]],
            }]
        );
    }

    #[test]
    fn summary_lines() {
        let text = summary_text(&record(), "soda ash");
        assert_eq!(
            text,
            "Title: Regulation 2020/1\nDistribution date: 2020-01-01\n\
             Keywords: soda ash\nSummary: Commission Regulation on soda ash\n"
        );
    }

    #[test]
    fn store_writes_into_kind_folders() {
        let dir = tempdir().unwrap();
        let layout = KeywordLayout::new(dir.path(), "eur_lex", "soda ash");
        let store = ArtifactStore::new(layout, "soda ash");
        let rec = record();

        let meta_path = store.save_metadata(&rec).unwrap();
        assert!(meta_path
            .ends_with("eur_lex/soda_ash/metadata/metadata_2020-01-01-Regulation_2020_1.json"));
        let meta = read_metadata(&meta_path);
        assert_eq!(meta.url, rec.url);
        assert_eq!(meta.keyword, "soda ash");
        assert!(meta.notified_country.is_none());
        let raw = std::fs::read_to_string(&meta_path).unwrap();
        assert!(raw.contains("\"URL\""));

        assert!(store.save_tables(&rec, "<p>no tables</p>").unwrap().is_none());
        assert!(store.save_summary(&rec).unwrap().is_file());
        let pdf = store.save_document(&rec, b"%PDF-1.4").unwrap();
        assert_eq!(std::fs::read(pdf).unwrap(), b"%PDF-1.4");
    }
}
