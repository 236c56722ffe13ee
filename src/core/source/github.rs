use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{TutorError, Result};
use super::FileSource;
use super::super::loader::PathFilter;
use super::super::types::SourceFile;

const GITHUB_API: &str = "https://api.github.com";
const MAX_RATE_LIMIT_WAITS: u32 = 3;
const MAX_RATE_LIMIT_SLEEP_SECS: u64 = 3600;

/// Owner, repository, optional ref and sub-path parsed from a GitHub URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocation {
    pub owner: String,
    pub repo: String,
    pub reference: Option<String>,
    /// Sub-directory inside the repository, empty for the root
    pub path: String,
}

impl RepoLocation {
    /// Accepts `https://github.com/{owner}/{repo}[.git][/tree/{ref}[/{path}]]`
    pub fn parse(url: &str) -> Result<Self> {
        let pattern = Regex::new(
            r"^(?:https?://)?(?:www\.)?github\.com/([^/]+)/([^/]+?)(?:\.git)?(?:/tree/([^/]+)(?:/(.*?))?)?/?$",
        )
        .map_err(|e| TutorError::Config(e.to_string()))?;

        let captures = pattern.captures(url.trim()).ok_or_else(|| {
            TutorError::Config(format!("Not a GitHub repository URL: {}", url))
        })?;

        Ok(Self {
            owner: captures[1].to_string(),
            repo: captures[2].to_string(),
            reference: captures.get(3).map(|m| m.as_str().to_string()),
            path: captures
                .get(4)
                .map(|m| m.as_str().trim_matches('/').to_string())
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: u64,
    download_url: Option<String>,
}

/// The GitHub listing endpoint returns an array for directories and a single object for files
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentListing {
    Directory(Vec<ContentEntry>),
    File(ContentEntry),
}

/// What the walk does with one listing entry
#[derive(Debug, PartialEq, Eq)]
enum Visit {
    Descend,
    Download,
    Skip,
}

/// Files of a GitHub repository (or a sub-directory of it) via the contents API
pub struct GithubSource {
    url: String,
    location: RepoLocation,
    token: Option<String>,
    max_file_size: Option<u64>,
    filter: Option<PathFilter>,
    client: reqwest::Client,
}

impl GithubSource {
    pub fn new(url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            location: RepoLocation::parse(url)?,
            token: token.filter(|t| !t.trim().is_empty()),
            max_file_size: None,
            filter: None,
            client: reqwest::Client::new(),
        })
    }

    /// Don't list excluded directories or download files the filter rejects
    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Skip downloading files larger than `bytes`, using the size the API reports
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    fn contents_url(&self, path: &str) -> String {
        let loc = &self.location;
        if path.is_empty() {
            format!("{}/repos/{}/{}/contents", GITHUB_API, loc.owner, loc.repo)
        } else {
            format!("{}/repos/{}/{}/contents/{}", GITHUB_API, loc.owner, loc.repo, path)
        }
    }

    fn relative_to_base(&self, path: &str) -> String {
        let base = &self.location.path;
        if base.is_empty() {
            return path.to_string();
        }
        if path == base {
            // The URL pointed at a single file
            return path.rsplit('/').next().unwrap_or(path).to_string();
        }
        path.strip_prefix(&format!("{}/", base))
            .unwrap_or(path)
            .to_string()
    }

    fn visit(&self, entry: &ContentEntry) -> Visit {
        let relative = self.relative_to_base(&entry.path);
        match entry.kind.as_str() {
            "dir" => match &self.filter {
                Some(filter) if filter.excludes_dir(&relative) => {
                    debug!("Not descending into excluded directory {}", entry.path);
                    Visit::Skip
                }
                _ => Visit::Descend,
            },
            "file" => {
                if let Some(filter) = &self.filter {
                    if !filter.accepts(&relative) {
                        debug!("Skipping {} (filtered)", entry.path);
                        return Visit::Skip;
                    }
                }
                match self.max_file_size {
                    Some(limit) if entry.size > limit => {
                        debug!("Skipping {} ({} bytes exceeds {})", entry.path, entry.size, limit);
                        Visit::Skip
                    }
                    _ => Visit::Download,
                }
            }
            other => {
                debug!("Skipping {} entry {}", other, entry.path);
                Visit::Skip
            }
        }
    }

    /// GET with auth, waiting out primary rate limits a bounded number of times
    async fn get(&self, url: &str, query: &[(&str, &str)], accept: &str) -> Result<reqwest::Response> {
        let mut waits = 0;
        loop {
            let mut request = self.client
                .get(url)
                .query(query)
                .header(USER_AGENT, concat!("tutorsmith/", env!("CARGO_PKG_VERSION")))
                .header(ACCEPT, accept);
            if let Some(token) = &self.token {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }

            let response = request
                .send()
                .await
                .map_err(|e| TutorError::SourceUnavailable(format!("GitHub request failed: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if is_rate_limited(status, response.headers()) && waits < MAX_RATE_LIMIT_WAITS {
                waits += 1;
                let wait = rate_limit_wait(response.headers());
                warn!("GitHub rate limit hit, waiting {:?} before retrying", wait);
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            let hint = if status == StatusCode::NOT_FOUND {
                " (repository, ref or path not found, or the token lacks access)"
            } else {
                ""
            };
            return Err(TutorError::SourceUnavailable(format!(
                "GitHub returned {} for {}{}: {}",
                status, url, hint, body
            )));
        }
    }

    async fn list_entries(&self, path: &str) -> Result<Vec<ContentEntry>> {
        let url = self.contents_url(path);
        let query: Vec<(&str, &str)> = self.location.reference
            .as_deref()
            .map(|r| vec![("ref", r)])
            .unwrap_or_default();

        let listing: ContentListing = self
            .get(&url, &query, "application/vnd.github+json")
            .await?
            .json()
            .await
            .map_err(|e| TutorError::SourceUnavailable(format!("Unexpected GitHub listing: {}", e)))?;

        Ok(match listing {
            ContentListing::Directory(entries) => entries,
            ContentListing::File(entry) => vec![entry],
        })
    }

    async fn download(&self, entry: &ContentEntry) -> Result<Vec<u8>> {
        let url = entry.download_url.as_deref().ok_or_else(|| {
            TutorError::SourceUnavailable(format!("No download URL for {}", entry.path))
        })?;

        let bytes = self
            .get(url, &[], "application/vnd.github.raw")
            .await?
            .bytes()
            .await
            .map_err(|e| TutorError::SourceUnavailable(format!("Download of {} failed: {}", entry.path, e)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FileSource for GithubSource {
    async fn list(&self) -> Result<Vec<SourceFile>> {
        let mut files = Vec::new();
        let mut pending = vec![self.location.path.clone()];

        while let Some(dir) = pending.pop() {
            for entry in self.list_entries(&dir).await? {
                match self.visit(&entry) {
                    Visit::Descend => pending.push(entry.path.clone()),
                    Visit::Download => {
                        let content = self.download(&entry).await?;
                        files.push(SourceFile::new(self.relative_to_base(&entry.path), content));
                    }
                    Visit::Skip => {}
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        info!("Fetched {} files from {}", files.len(), self.url);
        Ok(files)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);
    status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted)
}

fn rate_limit_wait(headers: &HeaderMap) -> Duration {
    let header_secs = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    let secs = if let Some(retry_after) = header_secs("retry-after") {
        retry_after.max(1) as u64
    } else if let Some(reset_at) = header_secs("x-ratelimit-reset") {
        (reset_at - chrono::Utc::now().timestamp()).max(0) as u64 + 1
    } else {
        60
    };
    Duration::from_secs(secs.min(MAX_RATE_LIMIT_SLEEP_SECS))
}
