//! In-process fakes for unit tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use repospec_core::models::{CommitSummary, Contributor, NodeKind, Release, RepoMetadata};
use repospec_core::RepoReference;

use crate::traits::{
    DirEntry, FragmentStream, GenerationError, GenerationRequest, HostError, RepoHost,
    TextGenerator,
};

pub fn metadata(owner: &str, name: &str) -> RepoMetadata {
    RepoMetadata {
        name: name.into(),
        owner: owner.into(),
        full_name: format!("{}/{}", owner, name),
        html_url: format!("https://github.com/{}/{}", owner, name),
        description: Some("Widgets as a service".into()),
        homepage: None,
        default_branch: "main".into(),
        visibility: "public".into(),
        primary_language: Some("Rust".into()),
        stars: 42,
        forks: 7,
        open_issues: 3,
        size_kb: 512,
        topics: vec!["widgets".into()],
        license: Some("MIT".into()),
        archived: false,
        created_at: None,
        pushed_at: None,
    }
}

fn dir(path: &str) -> DirEntry {
    DirEntry {
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        kind: NodeKind::Dir,
    }
}

fn file(path: &str) -> DirEntry {
    DirEntry {
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        kind: NodeKind::File,
    }
}

/// Scriptable [`RepoHost`]. Directories missing from `dirs` answer
/// `NotFound`; files missing from `files` answer `None`.
pub struct FakeHost {
    pub metadata: RepoMetadata,
    pub metadata_error: Option<HostError>,
    pub languages: Result<BTreeMap<String, u64>, HostError>,
    pub readme: Result<Option<String>, HostError>,
    pub dirs: HashMap<String, Vec<DirEntry>>,
    pub dir_errors: HashMap<String, HostError>,
    pub files: HashMap<String, String>,
    pub contributors: Result<Vec<Contributor>, HostError>,
    pub release: Result<Option<Release>, HostError>,
    pub commits: Result<Vec<CommitSummary>, HostError>,
    /// Pause before answering metadata requests.
    pub metadata_delay: Option<Duration>,
    /// Pause before answering directory listings.
    pub listing_delay: Option<Duration>,
    calls: AtomicUsize,
    listed: Mutex<Vec<String>>,
}

impl FakeHost {
    fn empty() -> Self {
        Self {
            metadata: metadata("acme", "widgets"),
            metadata_error: None,
            languages: Ok(BTreeMap::new()),
            readme: Ok(None),
            dirs: HashMap::new(),
            dir_errors: HashMap::new(),
            files: HashMap::new(),
            contributors: Ok(Vec::new()),
            release: Ok(None),
            commits: Ok(Vec::new()),
            metadata_delay: None,
            listing_delay: None,
            calls: AtomicUsize::new(0),
            listed: Mutex::new(Vec::new()),
        }
    }

    /// `acme/widgets`: a small Rust service with a Dockerfile and a SQL schema.
    pub fn widgets() -> Self {
        let mut host = Self::empty();
        host.languages = Ok(BTreeMap::from([
            ("Rust".to_string(), 9000),
            ("Dockerfile".to_string(), 1000),
        ]));
        host.readme = Ok(Some("# Widgets\n\nA widget service.".into()));
        host.dirs.insert(
            String::new(),
            vec![
                dir("src"),
                dir("db"),
                file("Cargo.toml"),
                file("Dockerfile"),
                file("README.md"),
            ],
        );
        host.dirs
            .insert("src".into(), vec![file("src/main.rs"), file("src/lib.rs")]);
        host.dirs.insert("db".into(), vec![file("db/schema.sql")]);
        host.files.insert(
            "Cargo.toml".into(),
            "[package]\nname = \"widgets\"\n\n[dependencies]\ntokio = \"1\"\nsqlx = { version = \"0.8\", features = [\"postgres\"] }\n"
                .into(),
        );
        host.files
            .insert("Dockerfile".into(), "FROM rust:1.80\nCMD [\"widgets\"]\n".into());
        host.files.insert(
            "db/schema.sql".into(),
            "CREATE TABLE widgets (id BIGINT PRIMARY KEY);\n".into(),
        );
        host.contributors = Ok(vec![Contributor {
            login: "alice".into(),
            contributions: 120,
        }]);
        host.commits = Ok(vec![CommitSummary {
            sha: "c0ffee".into(),
            summary: "Add widget endpoint".into(),
            author: Some("alice".into()),
            date: None,
        }]);
        host
    }

    pub fn failing_metadata(err: HostError) -> Self {
        let mut host = Self::widgets();
        host.metadata_error = Some(err);
        host
    }

    /// `a/b/{src,other}` with `a/b/src/deeper` below.
    pub fn nested() -> Self {
        let mut host = Self::empty();
        host.dirs.insert(String::new(), vec![dir("a")]);
        host.dirs.insert("a".into(), vec![dir("a/b")]);
        host.dirs
            .insert("a/b".into(), vec![dir("a/b/src"), dir("a/b/other")]);
        host.dirs.insert(
            "a/b/src".into(),
            vec![dir("a/b/src/deeper"), file("a/b/src/x.rs")],
        );
        host.dirs.insert("a/b/src/deeper".into(), Vec::new());
        host.dirs.insert("a/b/other".into(), Vec::new());
        host
    }

    /// A root with `n` empty directories.
    pub fn wide(n: usize) -> Self {
        let mut host = Self::empty();
        let entries: Vec<DirEntry> = (0..n).map(|i| dir(&format!("d{}", i))).collect();
        for entry in &entries {
            host.dirs.insert(entry.path.clone(), Vec::new());
        }
        host.dirs.insert(String::new(), entries);
        host
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn listed_paths(&self) -> Vec<String> {
        self.listed.lock().unwrap().clone()
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RepoHost for FakeHost {
    async fn repository(&self, _repo: &RepoReference) -> Result<RepoMetadata, HostError> {
        self.hit();
        if let Some(d) = self.metadata_delay {
            tokio::time::sleep(d).await;
        }
        match &self.metadata_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.metadata.clone()),
        }
    }

    async fn languages(&self, _repo: &RepoReference) -> Result<BTreeMap<String, u64>, HostError> {
        self.hit();
        self.languages.clone()
    }

    async fn readme(&self, _repo: &RepoReference) -> Result<Option<String>, HostError> {
        self.hit();
        self.readme.clone()
    }

    async fn list_dir(&self, _repo: &RepoReference, path: &str) -> Result<Vec<DirEntry>, HostError> {
        self.hit();
        self.listed.lock().unwrap().push(path.to_string());
        if let Some(d) = self.listing_delay {
            tokio::time::sleep(d).await;
        }
        if let Some(e) = self.dir_errors.get(path) {
            return Err(e.clone());
        }
        self.dirs
            .get(path)
            .cloned()
            .ok_or_else(|| HostError::NotFound(path.to_string()))
    }

    async fn file_content(&self, _repo: &RepoReference, path: &str) -> Result<Option<String>, HostError> {
        self.hit();
        Ok(self.files.get(path).cloned())
    }

    async fn contributors(&self, _repo: &RepoReference, limit: usize) -> Result<Vec<Contributor>, HostError> {
        self.hit();
        self.contributors
            .clone()
            .map(|c| c.into_iter().take(limit).collect())
    }

    async fn latest_release(&self, _repo: &RepoReference) -> Result<Option<Release>, HostError> {
        self.hit();
        self.release.clone()
    }

    async fn recent_commits(&self, _repo: &RepoReference, limit: usize) -> Result<Vec<CommitSummary>, HostError> {
        self.hit();
        self.commits
            .clone()
            .map(|c| c.into_iter().take(limit).collect())
    }
}

/// [`TextGenerator`] that replays fixed fragments.
pub struct ScriptedGenerator {
    pub fragments: Vec<String>,
    /// Yield this error after the first `n` fragments.
    pub fail_after: Option<(usize, GenerationError)>,
    /// Pause before each fragment.
    pub delay: Option<Duration>,
    /// Fragments handed to consumers so far.
    pub yielded: Arc<AtomicUsize>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            fail_after: None,
            delay: None,
            yielded: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A short spec split across several fragments.
    pub fn widgets_spec() -> Self {
        Self::new(&[
            "# widgets Technical Specification\n\n",
            "## Overview\n\nWidgets ",
            "as a service.\n\n",
            "## Tech Stack\n\n- Rust\n- Tokio\n",
        ])
    }

    pub fn full_text(&self) -> String {
        self.fragments.concat()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some((_, e)) = &self.fail_after {
            return Err(e.clone());
        }
        Ok(self.full_text())
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        let fragments = self.fragments.clone();
        let fail_after = self.fail_after.clone();
        let delay = self.delay;
        let yielded = self.yielded.clone();
        let stream = async_stream::stream! {
            for (i, fragment) in fragments.into_iter().enumerate() {
                if let Some((n, e)) = &fail_after {
                    if i == *n {
                        yield Err(e.clone());
                        return;
                    }
                }
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                yielded.fetch_add(1, Ordering::SeqCst);
                yield Ok(fragment);
            }
            if let Some((n, e)) = &fail_after {
                if *n >= yielded.load(Ordering::SeqCst) {
                    yield Err(e.clone());
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
