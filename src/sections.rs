//! Static specification section registry.
//!
//! Every section a generated spec may contain is a [`SectionId`] with one
//! [`SectionBuilder`] in the [`SectionRegistry`]. Builders decide whether
//! they apply to a request and write the instructions the prompt carries
//! for them. The registry is built once at startup and shared.
//!
//! After generation, [`SectionRegistry::split`] cuts the markdown on `## `
//! headings and keys each recognised section body by its id.

use std::collections::BTreeMap;

use repospec_core::models::{AnalysisOptions, AnalysisRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionId {
    Overview,
    TechStack,
    Architecture,
    Features,
    ApiReference,
    DataModels,
    GettingStarted,
    DocumentationGaps,
    Metrics,
}

impl SectionId {
    pub const ALL: [SectionId; 9] = [
        SectionId::Overview,
        SectionId::TechStack,
        SectionId::Architecture,
        SectionId::Features,
        SectionId::ApiReference,
        SectionId::DataModels,
        SectionId::GettingStarted,
        SectionId::DocumentationGaps,
        SectionId::Metrics,
    ];

    /// Key used in [`GeneratedSpec::sections`](repospec_core::models::GeneratedSpec).
    pub fn key(self) -> &'static str {
        match self {
            SectionId::Overview => "overview",
            SectionId::TechStack => "tech_stack",
            SectionId::Architecture => "architecture",
            SectionId::Features => "features",
            SectionId::ApiReference => "api_reference",
            SectionId::DataModels => "data_models",
            SectionId::GettingStarted => "getting_started",
            SectionId::DocumentationGaps => "documentation_gaps",
            SectionId::Metrics => "metrics",
        }
    }

    /// The `## ` heading the model is asked to use.
    pub fn heading(self) -> &'static str {
        match self {
            SectionId::Overview => "Overview",
            SectionId::TechStack => "Tech Stack",
            SectionId::Architecture => "Architecture",
            SectionId::Features => "Core Features",
            SectionId::ApiReference => "API Reference",
            SectionId::DataModels => "Data Models",
            SectionId::GettingStarted => "Getting Started",
            SectionId::DocumentationGaps => "Documentation Gaps",
            SectionId::Metrics => "Project Metrics",
        }
    }

    /// Other headings models commonly use for the same section.
    fn aliases(self) -> &'static [&'static str] {
        match self {
            SectionId::Overview => &["project overview", "summary"],
            SectionId::TechStack => &["technology stack", "technologies"],
            SectionId::Architecture => &["system architecture", "architecture overview"],
            SectionId::Features => &["features", "key features"],
            SectionId::ApiReference => &["api", "api documentation", "api endpoints"],
            SectionId::DataModels => &["data model", "database schema"],
            SectionId::GettingStarted => &["installation", "setup"],
            SectionId::DocumentationGaps => &["gaps", "missing documentation"],
            SectionId::Metrics => &["metrics", "repository metrics"],
        }
    }

    /// Match a heading's text against this section, ignoring case and a
    /// leading `3.`-style number.
    fn matches(self, heading: &str) -> bool {
        let text = strip_numbering(heading).to_lowercase();
        text == self.heading().to_lowercase() || self.aliases().iter().any(|a| *a == text)
    }
}

fn strip_numbering(heading: &str) -> &str {
    let trimmed = heading.trim();
    let digits = trimmed.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = trimmed[digits..].strip_prefix('.') {
            return rest.trim_start();
        }
    }
    trimmed
}

/// One section of the generated document.
pub trait SectionBuilder: Send + Sync {
    fn id(&self) -> SectionId;

    /// Whether the section is requested at all.
    fn enabled(&self, _options: &AnalysisOptions) -> bool {
        true
    }

    /// What the model should write under this section's heading.
    fn instructions(&self, record: &AnalysisRecord, options: &AnalysisOptions) -> String;
}

/// A section whose instructions never depend on the request.
struct FixedSection {
    id: SectionId,
    text: &'static str,
}

impl SectionBuilder for FixedSection {
    fn id(&self) -> SectionId {
        self.id
    }

    fn instructions(&self, _record: &AnalysisRecord, _options: &AnalysisOptions) -> String {
        self.text.to_string()
    }
}

struct TechStackSection;

impl SectionBuilder for TechStackSection {
    fn id(&self) -> SectionId {
        SectionId::TechStack
    }

    fn instructions(&self, record: &AnalysisRecord, _options: &AnalysisOptions) -> String {
        let mut text = String::from(
            "List languages, frameworks, databases and infrastructure with the role each plays. \
             Use a table where it helps.",
        );
        let detected: Vec<&str> = record
            .detected_frameworks
            .iter()
            .chain(&record.detected_databases)
            .chain(&record.detected_infrastructure)
            .map(String::as_str)
            .collect();
        if !detected.is_empty() {
            text.push_str(&format!(" Confirmed from manifests: {}.", detected.join(", ")));
        }
        text
    }
}

struct ArchitectureSection;

impl SectionBuilder for ArchitectureSection {
    fn id(&self) -> SectionId {
        SectionId::Architecture
    }

    fn instructions(&self, _record: &AnalysisRecord, options: &AnalysisOptions) -> String {
        let mut text = String::from(
            "Describe the main components, how they interact and how data flows between them.",
        );
        if options.include_architecture_diagram {
            text.push_str(
                " Include one Mermaid diagram (a ```mermaid fenced block) of the component structure.",
            );
        }
        text
    }
}

/// Sections that only apply when API documentation was requested.
struct ApiSection {
    id: SectionId,
    text: &'static str,
}

impl SectionBuilder for ApiSection {
    fn id(&self) -> SectionId {
        self.id
    }

    fn enabled(&self, options: &AnalysisOptions) -> bool {
        options.include_api_docs
    }

    fn instructions(&self, _record: &AnalysisRecord, _options: &AnalysisOptions) -> String {
        self.text.to_string()
    }
}

struct DocumentationGapsSection;

impl SectionBuilder for DocumentationGapsSection {
    fn id(&self) -> SectionId {
        SectionId::DocumentationGaps
    }

    fn instructions(&self, record: &AnalysisRecord, _options: &AnalysisOptions) -> String {
        let mut text = String::from(
            "List what a new contributor would still need to know that the repository does not document.",
        );
        if !record.unavailable.is_empty() {
            let missing: Vec<&str> = record.unavailable.iter().map(|s| s.label()).collect();
            text.push_str(&format!(
                " Note that the following could not be inspected: {}.",
                missing.join(", ")
            ));
        }
        text
    }
}

struct MetricsSection;

impl SectionBuilder for MetricsSection {
    fn id(&self) -> SectionId {
        SectionId::Metrics
    }

    fn instructions(&self, record: &AnalysisRecord, _options: &AnalysisOptions) -> String {
        let meta = &record.metadata;
        format!(
            "Summarize activity and size: {} stars, {} forks, {} open issues, {} contributors sampled{}.",
            meta.stars,
            meta.forks,
            meta.open_issues,
            record.contributors.len(),
            match &record.latest_release {
                Some(r) => format!(", latest release {}", r.tag_name),
                None => String::new(),
            }
        )
    }
}

/// All sections in document order.
pub struct SectionRegistry {
    builders: Vec<Box<dyn SectionBuilder>>,
}

impl SectionRegistry {
    pub fn standard() -> Self {
        let builders: Vec<Box<dyn SectionBuilder>> = vec![
            Box::new(FixedSection {
                id: SectionId::Overview,
                text: "Two or three paragraphs: what the project is, who it is for and the problem it solves.",
            }),
            Box::new(TechStackSection),
            Box::new(ArchitectureSection),
            Box::new(FixedSection {
                id: SectionId::Features,
                text: "The main capabilities, one bullet each, grounded in the files and structure shown.",
            }),
            Box::new(ApiSection {
                id: SectionId::ApiReference,
                text: "Public interfaces (HTTP routes, CLI commands or library entry points) with inputs and outputs.",
            }),
            Box::new(ApiSection {
                id: SectionId::DataModels,
                text: "Core entities and their fields, as far as schemas and manifests reveal them.",
            }),
            Box::new(FixedSection {
                id: SectionId::GettingStarted,
                text: "Prerequisites, install and run steps, in fenced shell blocks.",
            }),
            Box::new(DocumentationGapsSection),
            Box::new(MetricsSection),
        ];
        Self { builders }
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Builders that apply to `options`, in document order.
    pub fn enabled<'a>(
        &'a self,
        options: &'a AnalysisOptions,
    ) -> impl Iterator<Item = &'a dyn SectionBuilder> + 'a {
        self.builders
            .iter()
            .map(|b| b.as_ref())
            .filter(move |b| b.enabled(options))
    }

    fn resolve(&self, heading: &str) -> Option<SectionId> {
        self.builders
            .iter()
            .map(|b| b.id())
            .find(|id| id.matches(heading))
    }

    /// Split markdown on level-two headings.
    ///
    /// Headings that name no known section are dropped together with their
    /// body. Headings inside fenced code blocks are not split on.
    pub fn split(&self, markdown: &str) -> BTreeMap<String, String> {
        let mut sections = BTreeMap::new();
        let mut current: Option<SectionId> = None;
        let mut body = String::new();
        let mut in_fence = false;

        for line in markdown.lines() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
            }
            let heading = if in_fence { None } else { line.strip_prefix("## ") };
            match heading {
                Some(text) => {
                    if let Some(id) = current.take() {
                        sections.insert(id.key().to_string(), body.trim().to_string());
                    }
                    body.clear();
                    current = self.resolve(text);
                }
                None => {
                    if current.is_some() {
                        body.push_str(line);
                        body.push('\n');
                    }
                }
            }
        }
        if let Some(id) = current {
            sections.insert(id.key().to_string(), body.trim().to_string());
        }
        sections
    }
}

impl Default for SectionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
