//! GitHub REST API implementation of [`RepoHost`].
//!
//! Uses the v3 REST endpoints under `[github].api_base`. When the token
//! environment variable is set, requests are authenticated (5000 req/h);
//! otherwise they run unauthenticated (60 req/h) and a warning is logged
//! once at construction.
//!
//! Status mapping:
//! - 404 → [`HostError::NotFound`]
//! - 403, 429 → [`HostError::RateLimited`] (GitHub signals exhausted
//!   quota with 403)
//! - anything else non-2xx → [`HostError::Status`]

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use repospec_core::models::{CommitSummary, Contributor, NodeKind, Release, RepoMetadata};
use repospec_core::RepoReference;

use crate::config::GithubConfig;
use crate::traits::{DirEntry, HostError, RepoHost};

pub struct GithubClient {
    http: reqwest::Client,
    api_base: Url,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        let api_base = Url::parse(&config.api_base)
            .map_err(|e| anyhow::anyhow!("invalid github.api_base '{}': {}", config.api_base, e))?;

        let token = config.token();
        if token.is_none() {
            tracing::warn!(
                env = %config.token_env,
                "no GitHub token found; using unauthenticated requests (60/hour limit)"
            );
        }

        Ok(Self {
            http,
            api_base,
            token,
        })
    }

    fn url(&self, repo: &RepoReference, tail: &[&str]) -> Result<Url, HostError> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| HostError::Decode("api_base cannot be a base URL".into()))?;
            segments.pop_if_empty();
            segments.extend(["repos", repo.owner.as_str(), repo.repo.as_str()]);
            for part in tail {
                segments.extend(part.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    async fn send(&self, url: Url) -> Result<reqwest::Response, HostError> {
        let mut request = self
            .http
            .get(url.clone())
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HostError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(url = %url, status = status.as_u16(), "GitHub request failed");
        Err(classify_status(status, url.path(), &body))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, HostError> {
        let response = self.send(url).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| HostError::Decode(e.to_string()))
    }

    /// Like [`get_json`](Self::get_json) but maps 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, HostError> {
        match self.get_json(url).await {
            Ok(v) => Ok(Some(v)),
            Err(HostError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn classify_status(status: StatusCode, path: &str, body: &str) -> HostError {
    match status.as_u16() {
        404 => HostError::NotFound(path.to_string()),
        403 | 429 => HostError::RateLimited {
            status: status.as_u16(),
        },
        code => HostError::Status {
            status: code,
            message: truncate(body, 200),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Decode a base64 `content` field (GitHub wraps it at 60 columns).
/// Returns `None` for non-UTF-8 payloads.
pub fn decode_content(encoded: &str) -> Result<Option<String>, HostError> {
    let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| HostError::Decode(format!("invalid base64 content: {}", e)))?;
    Ok(String::from_utf8(bytes).ok())
}

// ============ Wire types ============

#[derive(Deserialize)]
struct RepoResponse {
    name: String,
    full_name: String,
    owner: OwnerResponse,
    html_url: String,
    description: Option<String>,
    homepage: Option<String>,
    default_branch: Option<String>,
    visibility: Option<String>,
    #[serde(default)]
    private: bool,
    language: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    open_issues_count: u64,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    topics: Vec<String>,
    license: Option<LicenseResponse>,
    #[serde(default)]
    archived: bool,
    created_at: Option<DateTime<Utc>>,
    pushed_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct OwnerResponse {
    login: String,
}

#[derive(Deserialize)]
struct LicenseResponse {
    spdx_id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentResponse {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    content: Option<String>,
    encoding: Option<String>,
}

/// `GET /contents/{path}` returns an array for directories and an object
/// for files.
#[derive(Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Listing(Vec<ContentResponse>),
    Single(Box<ContentResponse>),
}

#[derive(Deserialize)]
struct ContributorResponse {
    login: Option<String>,
    #[serde(default)]
    contributions: u64,
}

#[derive(Deserialize)]
struct ReleaseResponse {
    tag_name: String,
    name: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
    author: Option<OwnerResponse>,
}

#[derive(Deserialize)]
struct CommitDetail {
    message: String,
    author: Option<CommitAuthor>,
}

#[derive(Deserialize)]
struct CommitAuthor {
    name: Option<String>,
    date: Option<DateTime<Utc>>,
}

impl From<RepoResponse> for RepoMetadata {
    fn from(r: RepoResponse) -> Self {
        let visibility = r.visibility.unwrap_or_else(|| {
            if r.private { "private" } else { "public" }.to_string()
        });
        RepoMetadata {
            name: r.name,
            owner: r.owner.login,
            full_name: r.full_name,
            html_url: r.html_url,
            description: r.description.filter(|d| !d.is_empty()),
            homepage: r.homepage.filter(|h| !h.is_empty()),
            default_branch: r.default_branch.unwrap_or_else(|| "main".to_string()),
            visibility,
            primary_language: r.language,
            stars: r.stargazers_count,
            forks: r.forks_count,
            open_issues: r.open_issues_count,
            size_kb: r.size,
            topics: r.topics,
            license: r.license.and_then(|l| {
                l.spdx_id
                    .filter(|id| id != "NOASSERTION")
                    .or(l.name)
            }),
            archived: r.archived,
            created_at: r.created_at,
            pushed_at: r.pushed_at,
        }
    }
}

fn entry_kind(kind: &str) -> NodeKind {
    if kind == "dir" {
        NodeKind::Dir
    } else {
        NodeKind::File
    }
}

#[async_trait]
impl RepoHost for GithubClient {
    async fn repository(&self, repo: &RepoReference) -> Result<RepoMetadata, HostError> {
        let url = self.url(repo, &[])?;
        let response: RepoResponse = self.get_json(url).await?;
        Ok(response.into())
    }

    async fn languages(&self, repo: &RepoReference) -> Result<BTreeMap<String, u64>, HostError> {
        let url = self.url(repo, &["languages"])?;
        self.get_json(url).await
    }

    async fn readme(&self, repo: &RepoReference) -> Result<Option<String>, HostError> {
        let url = self.url(repo, &["readme"])?;
        let Some(file) = self.get_optional::<ContentResponse>(url).await? else {
            return Ok(None);
        };
        match (file.content, file.encoding.as_deref()) {
            (Some(content), Some("base64")) => decode_content(&content),
            _ => Ok(None),
        }
    }

    async fn list_dir(
        &self,
        repo: &RepoReference,
        path: &str,
    ) -> Result<Vec<DirEntry>, HostError> {
        let url = self.url(repo, &["contents", path])?;
        let entries = match self.get_json::<ContentsResponse>(url).await? {
            ContentsResponse::Listing(items) => items,
            ContentsResponse::Single(item) => vec![*item],
        };
        Ok(entries
            .into_iter()
            .map(|e| DirEntry {
                kind: entry_kind(&e.kind),
                name: e.name,
                path: e.path,
            })
            .collect())
    }

    async fn file_content(
        &self,
        repo: &RepoReference,
        path: &str,
    ) -> Result<Option<String>, HostError> {
        let url = self.url(repo, &["contents", path])?;
        match self.get_optional::<ContentsResponse>(url).await? {
            Some(ContentsResponse::Single(file)) => match (file.content, file.encoding.as_deref())
            {
                (Some(content), Some("base64")) => decode_content(&content),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    async fn contributors(
        &self,
        repo: &RepoReference,
        limit: usize,
    ) -> Result<Vec<Contributor>, HostError> {
        let mut url = self.url(repo, &["contributors"])?;
        url.query_pairs_mut()
            .append_pair("per_page", &limit.to_string());
        // Empty repositories answer 204 with no body.
        let response = self.send(url).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let items: Vec<ContributorResponse> = response
            .json()
            .await
            .map_err(|e| HostError::Decode(e.to_string()))?;
        Ok(items
            .into_iter()
            .filter_map(|c| {
                c.login.map(|login| Contributor {
                    login,
                    contributions: c.contributions,
                })
            })
            .take(limit)
            .collect())
    }

    async fn latest_release(&self, repo: &RepoReference) -> Result<Option<Release>, HostError> {
        let url = self.url(repo, &["releases", "latest"])?;
        Ok(self
            .get_optional::<ReleaseResponse>(url)
            .await?
            .map(|r| Release {
                tag_name: r.tag_name,
                name: r.name.filter(|n| !n.is_empty()),
                published_at: r.published_at,
            }))
    }

    async fn recent_commits(
        &self,
        repo: &RepoReference,
        limit: usize,
    ) -> Result<Vec<CommitSummary>, HostError> {
        let mut url = self.url(repo, &["commits"])?;
        url.query_pairs_mut()
            .append_pair("per_page", &limit.to_string());
        let items: Vec<CommitResponse> = match self.get_json(url).await {
            Ok(items) => items,
            // 409 Conflict: repository has no commits yet.
            Err(HostError::Status { status: 409, .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(items
            .into_iter()
            .take(limit)
            .map(|c| {
                let summary = c.commit.message.lines().next().unwrap_or("").to_string();
                let (name, date) = match c.commit.author {
                    Some(a) => (a.name, a.date),
                    None => (None, None),
                };
                CommitSummary {
                    sha: c.sha,
                    summary,
                    author: c.author.map(|a| a.login).or(name),
                    date,
                }
            })
            .collect())
    }
}
