//! Staged repository inspection.
//!
//! [`RepositoryAnalyzer::analyze`] builds an [`AnalysisRecord`] from a
//! sequence of hosting API sub-fetches. Only the metadata fetch is
//! mandatory. Every other section is best-effort: a failure is logged at
//! warn level, the section stays empty, and it is listed in
//! [`AnalysisRecord::unavailable`].
//!
//! Sampling is bounded by [`AnalysisLimits`], derived from the requested
//! [`AnalysisDepth`]:
//!
//! | | standard | deep |
//! |---|---|---|
//! | tree depth | 3 | 4 |
//! | directory listings | 40 | 120 |
//! | key files | 20 | 40 |
//! | bytes per key file | 10 000 | 20 000 |
//! | contributors | 5 | 10 |
//! | recent commits | 5 | 15 |

use futures_util::future::BoxFuture;
use std::sync::Arc;

use repospec_core::error::{ErrorKind, PipelineError};
use repospec_core::models::{
    AnalysisDepth, AnalysisOptions, AnalysisRecord, DirectoryNode, KeyFile, KeyFileKind,
    NodeKind, RecordSection,
};
use repospec_core::RepoReference;

use crate::detect;
use crate::progress::{AnalysisPhase, AnalysisProgress};
use crate::traits::{DirEntry, HostError, RepoHost};

/// Manifests, build and deployment configs looked for in the root listing.
pub const KEY_FILES: &[&str] = &[
    // dependencies
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "requirements.txt",
    "Pipfile",
    "pyproject.toml",
    "Cargo.toml",
    "go.mod",
    "Gemfile",
    "composer.json",
    "pom.xml",
    "build.gradle",
    // build and app config
    "tsconfig.json",
    "next.config.js",
    "next.config.mjs",
    "next.config.ts",
    "vite.config.ts",
    "vite.config.js",
    "webpack.config.js",
    ".env.example",
    ".env.sample",
    "config.yaml",
    "config.json",
    // containers and deployment
    "Dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    "kubernetes.yaml",
    "k8s.yaml",
    "serverless.yml",
    "vercel.json",
    "netlify.toml",
    // database
    "schema.prisma",
    "drizzle.config.ts",
    // API descriptions
    "openapi.yaml",
    "openapi.json",
    "swagger.yaml",
    "swagger.json",
];

/// Subdirectories searched for schema files.
const SCHEMA_DIRS: &[&str] = &["prisma", "database", "db", "config"];

const EXPLORE_DIRS: &[&str] = &[
    "src",
    "lib",
    "app",
    "pages",
    "api",
    "components",
    "services",
    "models",
    "controllers",
];

const DEEP_EXPLORE_DIRS: &[&str] = &[
    "src",
    "lib",
    "app",
    "pages",
    "api",
    "components",
    "services",
    "models",
    "controllers",
    "crates",
    "packages",
    "cmd",
    "internal",
    "pkg",
    "server",
    "client",
];

/// Dependency manifests, as opposed to lockfiles and other configs.
const DEPENDENCY_FILES: &[&str] = &[
    "package.json",
    "requirements.txt",
    "Cargo.toml",
    "go.mod",
    "Gemfile",
    "pom.xml",
];

/// Directories above this depth are always expanded.
const ALWAYS_EXPAND_BELOW: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisLimits {
    /// Deepest directory level that may be listed (root is 0).
    pub max_depth: usize,
    /// Total directory listings allowed, root included.
    pub listing_budget: usize,
    pub max_key_files: usize,
    pub max_file_bytes: usize,
    pub contributors: usize,
    pub commits: usize,
    /// Directory names expanded beyond [`ALWAYS_EXPAND_BELOW`].
    pub explore_dirs: &'static [&'static str],
}

impl AnalysisLimits {
    pub fn for_depth(depth: AnalysisDepth) -> Self {
        match depth {
            AnalysisDepth::Standard => Self {
                max_depth: 3,
                listing_budget: 40,
                max_key_files: 20,
                max_file_bytes: 10_000,
                contributors: 5,
                commits: 5,
                explore_dirs: EXPLORE_DIRS,
            },
            AnalysisDepth::Deep => Self {
                max_depth: 4,
                listing_budget: 120,
                max_key_files: 40,
                max_file_bytes: 20_000,
                contributors: 10,
                commits: 15,
                explore_dirs: DEEP_EXPLORE_DIRS,
            },
        }
    }
}

pub fn categorize_file(name: &str) -> KeyFileKind {
    if DEPENDENCY_FILES.contains(&name) {
        KeyFileKind::Dependency
    } else if name.contains("docker") || name.contains("Dockerfile") {
        KeyFileKind::Docker
    } else if name.to_lowercase().contains("readme") {
        KeyFileKind::Readme
    } else {
        KeyFileKind::Config
    }
}

fn is_schema_file(name: &str) -> bool {
    name.ends_with(".prisma") || name.contains("schema")
}

/// Cut `s` to at most `max` bytes on a char boundary.
pub fn truncate_utf8(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

fn degrade(record: &mut AnalysisRecord, section: RecordSection, repo: &RepoReference, err: &HostError) {
    tracing::warn!(
        repo = %repo,
        section = section.label(),
        error = %err,
        "sub-fetch failed; continuing without it"
    );
    record.unavailable.push(section);
}

pub struct RepositoryAnalyzer {
    host: Arc<dyn RepoHost>,
}

impl RepositoryAnalyzer {
    pub fn new(host: Arc<dyn RepoHost>) -> Self {
        Self { host }
    }

    /// Build the analysis record for `repo`.
    ///
    /// # Errors
    ///
    /// Fails only when the metadata fetch fails: `RATE_LIMITED` if the
    /// hosting API throttled us, `ANALYSIS_FAILED` otherwise.
    pub async fn analyze(
        &self,
        repo: &RepoReference,
        options: &AnalysisOptions,
        progress: &dyn AnalysisProgress,
    ) -> Result<AnalysisRecord, PipelineError> {
        let limits = AnalysisLimits::for_depth(options.analysis_depth);
        tracing::info!(repo = %repo, depth = ?options.analysis_depth, "analyzing repository");

        let metadata = self.host.repository(repo).await.map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::RateLimited => ErrorKind::RateLimited,
                _ => ErrorKind::AnalysisFailed,
            };
            PipelineError::new(kind, format!("metadata fetch for {} failed: {}", repo, e))
        })?;
        let mut record = AnalysisRecord::new(metadata);

        match self.host.languages(repo).await {
            Ok(languages) => record.languages = languages,
            Err(e) => degrade(&mut record, RecordSection::Languages, repo, &e),
        }

        match self.host.readme(repo).await {
            Ok(readme) => record.readme = readme,
            Err(e) if e.is_not_found() => {}
            Err(e) => degrade(&mut record, RecordSection::Readme, repo, &e),
        }

        progress.report(AnalysisPhase::StructureStarted).await;
        let mut budget = limits.listing_budget.saturating_sub(1);
        let root = match self.host.list_dir(repo, "").await {
            Ok(root) => Some(root),
            Err(e) => {
                degrade(&mut record, RecordSection::Structure, repo, &e);
                None
            }
        };
        if let Some(root) = &root {
            record.directory_tree = self
                .expand(repo, root.clone(), 0, &limits, &mut budget)
                .await;
        }

        progress.report(AnalysisPhase::KeyFilesStarted).await;
        match &root {
            Some(root) => {
                let (files, errors) = self.key_files(repo, root, &limits).await;
                if let Some(err) = errors.first() {
                    if files.is_empty() {
                        degrade(&mut record, RecordSection::KeyFiles, repo, err);
                    } else {
                        tracing::warn!(
                            repo = %repo,
                            failed = errors.len(),
                            fetched = files.len(),
                            "some key files could not be read"
                        );
                    }
                }
                record.key_files = files;
            }
            None => record.unavailable.push(RecordSection::KeyFiles),
        }

        match self.host.contributors(repo, limits.contributors).await {
            Ok(contributors) => record.contributors = contributors,
            Err(e) => degrade(&mut record, RecordSection::Contributors, repo, &e),
        }

        match self.host.latest_release(repo).await {
            Ok(release) => record.latest_release = release,
            Err(e) => degrade(&mut record, RecordSection::LatestRelease, repo, &e),
        }

        match self.host.recent_commits(repo, limits.commits).await {
            Ok(commits) => record.recent_commits = commits,
            Err(e) => degrade(&mut record, RecordSection::RecentCommits, repo, &e),
        }

        record.detected_frameworks = detect::detect_frameworks(&record.key_files);
        record.detected_databases = detect::detect_databases(&record.key_files);
        record.detected_infrastructure = detect::detect_infrastructure(&record.key_files);

        tracing::info!(
            repo = %repo,
            key_files = record.key_files.len(),
            unavailable = record.unavailable.len(),
            "analysis complete"
        );
        Ok(record)
    }

    /// Turn a listing into tree nodes, listing subdirectories while the
    /// depth and budget allow. Nested listing failures leave that
    /// directory unexpanded.
    fn expand<'a>(
        &'a self,
        repo: &'a RepoReference,
        entries: Vec<DirEntry>,
        depth: usize,
        limits: &'a AnalysisLimits,
        budget: &'a mut usize,
    ) -> BoxFuture<'a, Vec<DirectoryNode>> {
        Box::pin(async move {
            let mut nodes = Vec::with_capacity(entries.len());
            for entry in entries {
                let mut node = DirectoryNode {
                    name: entry.name,
                    path: entry.path,
                    kind: entry.kind,
                    children: Vec::new(),
                };

                let wanted = node.kind == NodeKind::Dir
                    && depth < limits.max_depth
                    && (depth < ALWAYS_EXPAND_BELOW
                        || limits.explore_dirs.contains(&node.name.as_str()));
                if wanted {
                    if *budget == 0 {
                        tracing::debug!(repo = %repo, path = %node.path, "listing budget exhausted");
                    } else {
                        *budget -= 1;
                        match self.host.list_dir(repo, &node.path).await {
                            Ok(children) => {
                                node.children =
                                    self.expand(repo, children, depth + 1, limits, budget).await;
                            }
                            Err(e) => {
                                tracing::debug!(repo = %repo, path = %node.path, error = %e, "subdirectory listing failed");
                            }
                        }
                    }
                }
                nodes.push(node);
            }
            nodes
        })
    }

    /// Fetch key files from the root listing, then schema files from the
    /// schema subdirectories that exist. Returns the files read and the
    /// errors met along the way.
    async fn key_files(
        &self,
        repo: &RepoReference,
        root: &[DirEntry],
        limits: &AnalysisLimits,
    ) -> (Vec<KeyFile>, Vec<HostError>) {
        let mut files = Vec::new();
        let mut errors = Vec::new();

        let candidates = root
            .iter()
            .filter(|e| e.kind == NodeKind::File && KEY_FILES.contains(&e.name.as_str()));
        for entry in candidates {
            if files.len() >= limits.max_key_files {
                return (files, errors);
            }
            match self.host.file_content(repo, &entry.path).await {
                Ok(Some(content)) => files.push(KeyFile {
                    path: entry.path.clone(),
                    name: entry.name.clone(),
                    content: truncate_utf8(content, limits.max_file_bytes),
                    kind: categorize_file(&entry.name),
                }),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        let schema_dirs = root
            .iter()
            .filter(|e| e.kind == NodeKind::Dir && SCHEMA_DIRS.contains(&e.name.as_str()));
        for dir in schema_dirs {
            let listing = match self.host.list_dir(repo, &dir.path).await {
                Ok(listing) => listing,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            for entry in listing
                .iter()
                .filter(|e| e.kind == NodeKind::File && is_schema_file(&e.name))
            {
                if files.len() >= limits.max_key_files {
                    return (files, errors);
                }
                match self.host.file_content(repo, &entry.path).await {
                    Ok(Some(content)) => files.push(KeyFile {
                        path: entry.path.clone(),
                        name: entry.name.clone(),
                        content: truncate_utf8(content, limits.max_file_bytes),
                        kind: KeyFileKind::Config,
                    }),
                    Ok(None) => {}
                    Err(e) => errors.push(e),
                }
            }
        }

        (files, errors)
    }
}
