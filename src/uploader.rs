use std::path::{Component, Path};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::mirror::subdirs;

const API_VERSION: &str = "2021-08-06";
const TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Azure Blob Storage client authorised by a SAS token.
pub struct BlobUploader {
    client: reqwest::Client,
    account_url: Url,
    sas_token: String,
}

impl BlobUploader {
    pub fn new(account_url: &str, sas_token: &str) -> Result<Self> {
        let mut account_url = Url::parse(account_url)
            .with_context(|| format!("Invalid account URL {}", account_url))?;
        if !account_url.path().ends_with('/') {
            let path = format!("{}/", account_url.path());
            account_url.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            account_url,
            sas_token: sas_token.trim_start_matches('?').to_string(),
        })
    }

    /// Account URL extended by `segments`, each percent-encoded on its own,
    /// with the SAS token appended to the query.
    fn url<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
        extra_query: Option<&str>,
    ) -> Result<Url> {
        let mut url = self.account_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Account URL {} cannot take a path", self.account_url))?
            .pop_if_empty()
            .extend(segments);
        let query = match extra_query {
            Some(q) => format!("{}&{}", q, self.sas_token),
            None => self.sas_token.clone(),
        };
        url.set_query(Some(&query));
        Ok(url)
    }

    fn blob_url(&self, container: &str, blob: &str) -> Result<Url> {
        self.url(std::iter::once(container).chain(blob.split('/')), None)
    }

    /// Create `container` unless it already exists.
    pub async fn ensure_container(&self, container: &str) -> Result<()> {
        let url = self.url([container], Some("restype=container"))?;
        let response = self
            .client
            .put(url)
            .header("x-ms-version", API_VERSION)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => {
                info!("Created container {}", container);
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!(
                    "Creating container {} failed with {} ({})",
                    container,
                    status,
                    error_code(&body).unwrap_or_default()
                )
            }
        }
    }

    pub async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool> {
        let url = self.blob_url(container, blob)?;
        let response = self
            .client
            .head(url)
            .header("x-ms-version", API_VERSION)
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => bail!("Probing {}/{} failed with {}", container, blob, status),
        }
    }

    /// Upload `path` as a block blob unless one already exists under `blob`.
    /// Returns `false` when the blob was skipped.
    pub async fn upload_file(&self, container: &str, blob: &str, path: &Path) -> Result<bool> {
        if self.blob_exists(container, blob).await? {
            debug!("{}/{} already exists", container, blob);
            return Ok(false);
        }
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let url = self.blob_url(container, blob)?;
        let response = self
            .client
            .put(url)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-blob-type", "BlockBlob")
            .header(CONTENT_TYPE, content_type(path))
            .body(bytes)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Uploading {} failed with {} ({})",
                path.display(),
                status,
                error_code(&body).unwrap_or_default()
            );
        }
        Ok(true)
    }

    /// Push every file under `root`. Each top-level folder becomes one
    /// container; blob names are paths relative to `root`.
    pub async fn upload_tree(&self, root: &Path) -> Result<UploadStats> {
        let mut stats = UploadStats::default();
        let folders = if root.is_dir() { subdirs(root)? } else { Vec::new() };
        if folders.is_empty() {
            warn!("No containers specified under {}", root.display());
            return Ok(stats);
        }

        let mut files = Vec::new();
        for folder in &folders {
            for entry in WalkDir::new(folder)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                files.push(entry.into_path());
            }
        }

        let pb = ProgressBar::new(files.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
        {
            pb.set_style(style.progress_chars("=> "));
        }

        let mut ready: Option<String> = None;
        for path in files {
            let Some((container, blob)) = blob_location(root, &path) else {
                stats.failed += 1;
                pb.inc(1);
                continue;
            };
            if ready.as_deref() != Some(container.as_str()) {
                self.ensure_container(&container).await?;
                ready = Some(container.clone());
            }
            match self.upload_file(&container, &blob, &path).await {
                Ok(true) => stats.uploaded += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    warn!("{:#}", e);
                    stats.failed += 1;
                }
            }
            pb.inc(1);
        }

        pb.finish_and_clear();
        info!(
            "Uploaded {} files ({} already present, {} failed)",
            stats.uploaded, stats.skipped, stats.failed
        );
        Ok(stats)
    }
}

/// Container and blob name for a file under the processed root.
fn blob_location(root: &Path, path: &Path) -> Option<(String, String)> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    let top = parts.first()?;
    Some((container_name(top), parts.join("/")))
}

/// Azure container names: 3-63 chars of lowercase letters, digits and
/// single hyphens, starting and ending with a letter or digit.
pub fn container_name(folder: &str) -> String {
    let mut name = String::new();
    for c in folder.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.is_empty() && !name.ends_with('-') {
            name.push('-');
        }
    }
    let mut name = name.trim_end_matches('-').to_string();
    name.truncate(63);
    let mut name = name.trim_end_matches('-').to_string();
    while name.len() < 3 {
        name.push('0');
    }
    name
}

pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("zip") => "application/zip",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// The `<Code>` of an Azure storage error body.
pub fn error_code(xml: &str) -> Option<String> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut in_code = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"Code" => in_code = true,
            Ok(Event::Text(e)) if in_code => return e.unescape().ok().map(|t| t.to_string()),
            Ok(Event::End(e)) if e.name().as_ref() == b"Code" => in_code = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn container_names() {
        assert_eq!(container_name("eur_lex"), "eur-lex");
        assert_eq!(container_name("ECHA"), "echa");
        assert_eq!(container_name("__x"), "x00");
        assert_eq!(container_name(&"a".repeat(80)).len(), 63);
    }

    #[test]
    fn blob_names_are_relative_to_root() {
        let root = PathBuf::from("/data/processed");
        let file = root.join("eur_lex/soda_ash/2020-01-01-Doc.zip");
        assert_eq!(
            blob_location(&root, &file),
            Some((
                "eur-lex".to_string(),
                "eur_lex/soda_ash/2020-01-01-Doc.zip".to_string()
            ))
        );
        assert_eq!(blob_location(&root, Path::new("/elsewhere/a.zip")), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type(Path::new("a/b.ZIP")), "application/zip");
        assert_eq!(content_type(Path::new("b.json")), "application/json");
        assert_eq!(content_type(Path::new("noext")), "application/octet-stream");
    }

    const AUTH_FAILED: &str = concat!(
        r#"<?xml version="1.0" encoding="utf-8"?><Error><Code>AuthenticationFailed</Code>"#,
        "<Message>Server failed to authenticate the request.</Message></Error>"
    );

    #[test]
    fn azure_error_code() {
        assert_eq!(error_code(AUTH_FAILED).as_deref(), Some("AuthenticationFailed"));
        assert_eq!(error_code("not xml at all"), None);
    }

    #[test]
    fn sas_token_is_appended() {
        let up = BlobUploader::new("https://acct.blob.core.windows.net", "?sv=2022&sig=abc")
            .unwrap();
        let url = up.blob_url("eur-lex", "a/b.zip").unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/eur-lex/a/b.zip?sv=2022&sig=abc"
        );
        let url = up.url(["eur-lex"], Some("restype=container")).unwrap();
        assert_eq!(url.path(), "/eur-lex");
        assert_eq!(url.query(), Some("restype=container&sv=2022&sig=abc"));

        let emulator =
            BlobUploader::new("http://127.0.0.1:10000/devstoreaccount1", "sig=x").unwrap();
        let url = emulator.blob_url("echa", "ECHA/boron/k.zip").unwrap();
        assert_eq!(url.path(), "/devstoreaccount1/echa/ECHA/boron/k.zip");
    }

    #[test]
    fn reserved_characters_stay_in_the_blob_path() {
        use crate::layout::keyword_dir_name;
        use crate::sites::derive_key;

        let up = BlobUploader::new("https://acct.blob.core.windows.net", "sig=abc").unwrap();
        let root = PathBuf::from("/data/processed");
        let folder = keyword_dir_name("CAS #5 ?50%");
        let mut paths = Vec::new();
        for name in ["Decision #12 annex", "Decision #13 annex", "Rate 5% draft"] {
            let key = derive_key("2020-01-01", name, None);
            let file = root.join("eur_lex").join(&folder).join(format!("{}.zip", key));
            let (container, blob) = blob_location(&root, &file).unwrap();
            let url = up.blob_url(&container, &blob).unwrap();
            assert_eq!(url.fragment(), None);
            assert_eq!(url.query(), Some("sig=abc"));
            paths.push(url.path().to_string());
        }

        assert_eq!(
            paths,
            vec![
                "/eur-lex/eur_lex/CAS_%235_%3F50%25/2020-01-01-Decision_%2312_annex.zip",
                "/eur-lex/eur_lex/CAS_%235_%3F50%25/2020-01-01-Decision_%2313_annex.zip",
                "/eur-lex/eur_lex/CAS_%235_%3F50%25/2020-01-01-Rate_5%25_draft.zip",
            ]
        );
    }

    // ── Local blob service ──

    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        path: String,
        query: String,
        headers: HashMap<String, String>,
    }

    type Log = Arc<Mutex<Vec<Seen>>>;

    async fn read_request(stream: &mut TcpStream) -> Option<Seen> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let mut lines = head.lines();
        let mut request_line = lines.next()?.split(' ');
        let method = request_line.next()?.to_string();
        let target = request_line.next()?;
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let headers: HashMap<String, String> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();

        let length: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        while buf.len() < head_end + length {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        Some(Seen {
            method,
            path: path.to_string(),
            query: query.to_string(),
            headers,
        })
    }

    /// Answers HEAD with 200 for `existing` paths, fails any PUT whose path
    /// contains "broken", and accepts every other PUT.
    async fn blob_service(existing: HashSet<String>, log: Log) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let existing = existing.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let Some(seen) = read_request(&mut stream).await else {
                        return;
                    };
                    let (status, body) = match seen.method.as_str() {
                        "HEAD" if existing.contains(&seen.path) => ("200 OK", ""),
                        "HEAD" => ("404 Not Found", ""),
                        "PUT" if seen.path.contains("broken") => {
                            ("403 Forbidden", AUTH_FAILED)
                        }
                        "PUT" => ("201 Created", ""),
                        _ => ("405 Method Not Allowed", ""),
                    };
                    log.lock().unwrap().push(seen);
                    let response = format!(
                        "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        format!("http://{}/", addr)
    }

    fn write(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"payload").unwrap();
    }

    #[tokio::test]
    async fn upload_tree_skips_existing_and_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("eur_lex/glass/2020-01-01-A.zip"));
        write(&root.join("eur_lex/glass/2020-01-02-B.zip"));
        write(&root.join("ECHA/boron/2021-05-03-broken.zip"));
        write(&root.join("ECHA/boron/notes.json"));

        let log: Log = Arc::default();
        let existing = HashSet::from(["/eur-lex/eur_lex/glass/2020-01-02-B.zip".to_string()]);
        let account_url = blob_service(existing, log.clone()).await;
        let up = BlobUploader::new(&account_url, "sig=abc").unwrap();

        let stats = up.upload_tree(root).await.unwrap();
        assert_eq!(
            stats,
            UploadStats {
                uploaded: 2,
                skipped: 1,
                failed: 1,
            }
        );

        let seen = log.lock().unwrap().clone();
        assert!(seen.iter().all(|s| s.query.ends_with("sig=abc")));

        let containers: Vec<&str> = seen
            .iter()
            .filter(|s| s.method == "PUT" && s.query.starts_with("restype=container"))
            .map(|s| s.path.as_str())
            .collect();
        assert_eq!(containers, vec!["/echa", "/eur-lex"]);

        let blob_puts: HashMap<&str, &Seen> = seen
            .iter()
            .filter(|s| s.method == "PUT" && !s.query.starts_with("restype=container"))
            .map(|s| (s.path.as_str(), s))
            .collect();
        assert!(!blob_puts.contains_key("/eur-lex/eur_lex/glass/2020-01-02-B.zip"));

        let a = blob_puts["/eur-lex/eur_lex/glass/2020-01-01-A.zip"];
        assert_eq!(a.headers["content-type"], "application/zip");
        assert_eq!(a.headers["x-ms-blob-type"], "BlockBlob");
        let notes = blob_puts["/echa/ECHA/boron/notes.json"];
        assert_eq!(notes.headers["content-type"], "application/json");
        assert!(blob_puts.contains_key("/echa/ECHA/boron/2021-05-03-broken.zip"));
    }

    #[tokio::test]
    async fn second_upload_is_all_skips() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("eur_lex/glass/2020-01-01-A.zip"));

        let log: Log = Arc::default();
        let existing = HashSet::from(["/eur-lex/eur_lex/glass/2020-01-01-A.zip".to_string()]);
        let account_url = blob_service(existing, log.clone()).await;
        let up = BlobUploader::new(&account_url, "sig=abc").unwrap();

        let stats = up.upload_tree(root).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.uploaded, 0);
        let blob_puts = log
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.method == "PUT" && !s.query.starts_with("restype=container"))
            .count();
        assert_eq!(blob_puts, 0);
    }
}
