//! Core data models used throughout repospec.
//!
//! These types represent the analysis record assembled from the hosting
//! API, the generated specification, and the stored (shareable) projection
//! of it. Types that cross the HTTP boundary serialize in camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ErrorKind;

/// Version tag written into every generated spec's metadata.
pub const ANALYSIS_VERSION: &str = "1.0";

// ============ Options ============

/// How widely the analyzer samples the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisDepth {
    #[default]
    Standard,
    Deep,
}

impl std::str::FromStr for AnalysisDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(AnalysisDepth::Standard),
            "deep" => Ok(AnalysisDepth::Deep),
            other => Err(format!(
                "unknown analysis depth '{}': expected standard or deep",
                other
            )),
        }
    }
}

/// Per-request analysis toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOptions {
    pub include_api_docs: bool,
    pub include_architecture_diagram: bool,
    pub analysis_depth: AnalysisDepth,
    /// Skip the cache lookup and always regenerate.
    pub refresh: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            include_api_docs: true,
            include_architecture_diagram: true,
            analysis_depth: AnalysisDepth::Standard,
            refresh: false,
        }
    }
}

// ============ Validation ============

/// Outcome of the existence/accessibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            error_kind: None,
            message: None,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error_kind: Some(kind),
            message: Some(message.into()),
        }
    }
}

// ============ Analysis record ============

/// Repository metadata from the hosting API. Always present in a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMetadata {
    pub name: String,
    pub owner: String,
    pub full_name: String,
    pub html_url: String,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub default_branch: String,
    pub visibility: String,
    pub primary_language: Option<String>,
    pub stars: u64,
    pub forks: u64,
    pub open_issues: u64,
    /// Reported size in kilobytes.
    pub size_kb: u64,
    pub topics: Vec<String>,
    pub license: Option<String>,
    pub archived: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Dir,
}

/// One entry of the sampled directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DirectoryNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFileKind {
    Dependency,
    Config,
    Docker,
    Readme,
    Other,
}

/// Contents of a sampled configuration/manifest file, truncated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFile {
    pub path: String,
    pub name: String,
    pub content: String,
    pub kind: KeyFileKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub login: String,
    pub contributions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    pub name: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    /// First line of the commit message.
    pub summary: String,
    pub author: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// Best-effort sections of a record. Listed in
/// [`AnalysisRecord::unavailable`] when their fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSection {
    Languages,
    Readme,
    Structure,
    KeyFiles,
    Contributors,
    LatestRelease,
    RecentCommits,
}

impl RecordSection {
    pub fn label(self) -> &'static str {
        match self {
            RecordSection::Languages => "language breakdown",
            RecordSection::Readme => "README",
            RecordSection::Structure => "directory structure",
            RecordSection::KeyFiles => "key configuration files",
            RecordSection::Contributors => "contributors",
            RecordSection::LatestRelease => "latest release",
            RecordSection::RecentCommits => "recent commits",
        }
    }
}

/// Everything the analyzer learned about one repository.
///
/// Built once per request and discarded after generation. Only `metadata`
/// is guaranteed; every other section may be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub metadata: RepoMetadata,
    /// Bytes of code per language, as reported by the hosting API.
    pub languages: BTreeMap<String, u64>,
    pub readme: Option<String>,
    pub directory_tree: Vec<DirectoryNode>,
    pub key_files: Vec<KeyFile>,
    pub contributors: Vec<Contributor>,
    pub latest_release: Option<Release>,
    pub recent_commits: Vec<CommitSummary>,
    pub detected_frameworks: Vec<String>,
    pub detected_databases: Vec<String>,
    pub detected_infrastructure: Vec<String>,
    pub unavailable: Vec<RecordSection>,
}

impl AnalysisRecord {
    /// A record holding only metadata; all best-effort sections empty.
    pub fn new(metadata: RepoMetadata) -> Self {
        Self {
            metadata,
            languages: BTreeMap::new(),
            readme: None,
            directory_tree: Vec::new(),
            key_files: Vec::new(),
            contributors: Vec::new(),
            latest_release: None,
            recent_commits: Vec::new(),
            detected_frameworks: Vec::new(),
            detected_databases: Vec::new(),
            detected_infrastructure: Vec::new(),
            unavailable: Vec::new(),
        }
    }

    /// SHA of the newest commit seen, if the commit fetch succeeded.
    pub fn head_sha(&self) -> Option<&str> {
        self.recent_commits.first().map(|c| c.sha.as_str())
    }

    /// Language shares in whole percent, largest first.
    pub fn language_percentages(&self) -> Vec<(String, u64)> {
        let total: u64 = self.languages.values().sum();
        if total == 0 {
            return Vec::new();
        }
        let mut out: Vec<(String, u64)> = self
            .languages
            .iter()
            .map(|(lang, bytes)| (lang.clone(), (bytes * 100 + total / 2) / total))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// Render the directory tree as an indented ASCII listing.
    pub fn format_tree(&self) -> String {
        let mut out = String::new();
        format_nodes(&self.directory_tree, "", &mut out);
        out
    }
}

fn format_nodes(nodes: &[DirectoryNode], prefix: &str, out: &mut String) {
    for (i, node) in nodes.iter().enumerate() {
        let last = i + 1 == nodes.len();
        let branch = if last { "`-- " } else { "|-- " };
        let suffix = if node.kind == NodeKind::Dir { "/" } else { "" };
        out.push_str(prefix);
        out.push_str(branch);
        out.push_str(&node.name);
        out.push_str(suffix);
        out.push('\n');
        if !node.children.is_empty() {
            let child_prefix = format!("{}{}", prefix, if last { "    " } else { "|   " });
            format_nodes(&node.children, &child_prefix, out);
        }
    }
}

// ============ Generated and stored specs ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecMetadata {
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_url: String,
    pub generated_at: DateTime<Utc>,
    pub analysis_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

impl SpecMetadata {
    pub fn for_record(record: &AnalysisRecord, generated_at: DateTime<Utc>) -> Self {
        Self {
            repo_owner: record.metadata.owner.clone(),
            repo_name: record.metadata.name.clone(),
            repo_url: record.metadata.html_url.clone(),
            generated_at,
            analysis_version: ANALYSIS_VERSION.to_string(),
            commit_sha: record.head_sha().map(str::to_string),
        }
    }
}

/// A generated specification document.
///
/// `share_id` is assigned by whoever persists the spec, never by the
/// generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSpec {
    pub markdown: String,
    /// Markdown body of each recognised `## ` section, keyed by section id.
    pub sections: BTreeMap<String, String>,
    pub metadata: SpecMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
}

/// Persisted projection of a [`GeneratedSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSpec {
    pub id: String,
    pub share_id: String,
    pub markdown: String,
    pub sections: BTreeMap<String, String>,
    pub metadata: SpecMetadata,
    pub view_count: i64,
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredSpec {
    /// Lowercased `owner/repo` of the analyzed repository.
    pub fn cache_key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.repo_owner.to_ascii_lowercase(),
            self.metadata.repo_name.to_ascii_lowercase()
        )
    }

    /// Rebuild the generated spec this record was persisted from.
    pub fn to_generated(&self) -> GeneratedSpec {
        GeneratedSpec {
            markdown: self.markdown.clone(),
            sections: self.sections.clone(),
            metadata: self.metadata.clone(),
            share_id: Some(self.share_id.clone()),
        }
    }
}

/// A repository ranked by how often its public specs are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularRepo {
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_url: String,
    pub analysis_count: i64,
    pub total_views: i64,
}
