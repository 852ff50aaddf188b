//! Prompt construction.
//!
//! Renders an [`AnalysisRecord`] into the context block the model sees and
//! appends the output contract built from the enabled sections. Batch and
//! streaming generation send the same request.

use std::fmt::Write;

use repospec_core::models::{AnalysisOptions, AnalysisRecord};

use crate::sections::SectionRegistry;
use crate::traits::GenerationRequest;

const SYSTEM_PROMPT: &str = "You are a senior software engineer writing technical specifications \
for open-source repositories. Write clear GitHub-flavored markdown. Base every statement on the \
repository data you are given; when something cannot be determined, say so instead of guessing.";

/// README text beyond this many bytes is cut from the prompt.
const README_BYTES: usize = 6_000;

pub fn build_request(
    record: &AnalysisRecord,
    options: &AnalysisOptions,
    registry: &SectionRegistry,
    max_tokens: u32,
) -> GenerationRequest {
    let mut prompt = render_context(record);

    let _ = writeln!(prompt, "\n---\n");
    let _ = writeln!(
        prompt,
        "Write the specification. Start with `# {} Technical Specification`, then use exactly these \
         level-two headings, in this order:\n",
        record.metadata.name
    );
    for section in registry.enabled(options) {
        let id = section.id();
        let _ = writeln!(
            prompt,
            "## {}\n{}\n",
            id.heading(),
            section.instructions(record, options)
        );
    }

    GenerationRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        max_tokens,
    }
}

fn render_context(record: &AnalysisRecord) -> String {
    let meta = &record.metadata;
    let mut out = String::new();

    let _ = writeln!(out, "# Repository: {}\n", meta.full_name);
    let _ = writeln!(out, "- URL: {}", meta.html_url);
    if let Some(description) = &meta.description {
        let _ = writeln!(out, "- Description: {}", description);
    }
    if let Some(homepage) = &meta.homepage {
        let _ = writeln!(out, "- Homepage: {}", homepage);
    }
    let _ = writeln!(out, "- Default branch: {}", meta.default_branch);
    if let Some(lang) = &meta.primary_language {
        let _ = writeln!(out, "- Primary language: {}", lang);
    }
    if let Some(license) = &meta.license {
        let _ = writeln!(out, "- License: {}", license);
    }
    if !meta.topics.is_empty() {
        let _ = writeln!(out, "- Topics: {}", meta.topics.join(", "));
    }
    let _ = writeln!(
        out,
        "- Stars: {}, forks: {}, open issues: {}",
        meta.stars, meta.forks, meta.open_issues
    );
    if meta.archived {
        let _ = writeln!(out, "- This repository is archived.");
    }

    let languages = record.language_percentages();
    if !languages.is_empty() {
        let _ = writeln!(out, "\n## Languages\n");
        for (lang, pct) in languages {
            let _ = writeln!(out, "- {}: {}%", lang, pct);
        }
    }

    let detected = [
        ("Frameworks", &record.detected_frameworks),
        ("Databases", &record.detected_databases),
        ("Infrastructure", &record.detected_infrastructure),
    ];
    if detected.iter().any(|(_, list)| !list.is_empty()) {
        let _ = writeln!(out, "\n## Detected technologies\n");
        for (label, list) in detected {
            if !list.is_empty() {
                let _ = writeln!(out, "- {}: {}", label, list.join(", "));
            }
        }
    }

    if !record.directory_tree.is_empty() {
        let _ = writeln!(out, "\n## Directory structure\n\n```\n{}```", record.format_tree());
    }

    if let Some(readme) = &record.readme {
        let readme = crate::analyzer::truncate_utf8(readme.clone(), README_BYTES);
        let _ = writeln!(out, "\n## README\n\n{}", readme);
    }

    if !record.key_files.is_empty() {
        let _ = writeln!(out, "\n## Key files");
        for file in &record.key_files {
            let _ = writeln!(out, "\n### {}\n\n```\n{}\n```", file.path, file.content.trim_end());
        }
    }

    if !record.contributors.is_empty() {
        let names: Vec<String> = record
            .contributors
            .iter()
            .map(|c| format!("{} ({})", c.login, c.contributions))
            .collect();
        let _ = writeln!(out, "\n## Top contributors\n\n{}", names.join(", "));
    }

    if let Some(release) = &record.latest_release {
        let _ = writeln!(
            out,
            "\n## Latest release\n\n{}{}",
            release.tag_name,
            release
                .published_at
                .map(|d| format!(" ({})", d.format("%Y-%m-%d")))
                .unwrap_or_default()
        );
    }

    if !record.recent_commits.is_empty() {
        let _ = writeln!(out, "\n## Recent commits\n");
        for commit in &record.recent_commits {
            let short = commit.sha.get(..7).unwrap_or(&commit.sha);
            let _ = writeln!(out, "- {} {}", short, commit.summary);
        }
    }

    if !record.unavailable.is_empty() {
        let missing: Vec<&str> = record.unavailable.iter().map(|s| s.label()).collect();
        let _ = writeln!(
            out,
            "\nThe following could not be retrieved: {}.",
            missing.join(", ")
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use repospec_core::models::{KeyFile, KeyFileKind, RecordSection};

    fn record() -> AnalysisRecord {
        let mut record = AnalysisRecord::new(testing::metadata("acme", "widgets"));
        record.languages.insert("Rust".into(), 900);
        record.languages.insert("Shell".into(), 100);
        record.key_files.push(KeyFile {
            path: "Cargo.toml".into(),
            name: "Cargo.toml".into(),
            content: "[dependencies]\ntokio = \"1\"\n".into(),
            kind: KeyFileKind::Dependency,
        });
        record.detected_frameworks.push("Tokio".into());
        record
    }

    #[test]
    fn prompt_carries_record_facts() {
        let request = build_request(
            &record(),
            &AnalysisOptions::default(),
            &SectionRegistry::standard(),
            4000,
        );
        assert_eq!(request.max_tokens, 4000);
        assert!(request.prompt.contains("# Repository: acme/widgets"));
        assert!(request.prompt.contains("- Rust: 90%"));
        assert!(request.prompt.contains("### Cargo.toml"));
        assert!(request.prompt.contains("- Frameworks: Tokio"));
        assert!(request.prompt.contains("# widgets Technical Specification"));
        assert!(request.prompt.contains("## API Reference"));
    }

    #[test]
    fn disabled_sections_are_not_requested() {
        let options = AnalysisOptions {
            include_api_docs: false,
            include_architecture_diagram: false,
            ..Default::default()
        };
        let request = build_request(&record(), &options, &SectionRegistry::standard(), 4000);
        assert!(!request.prompt.contains("## API Reference"));
        assert!(!request.prompt.contains("## Data Models"));
        assert!(!request.prompt.contains("Mermaid"));
        assert!(request.prompt.contains("## Architecture"));
    }

    #[test]
    fn unavailable_sections_are_disclosed() {
        let mut record = record();
        record.unavailable.push(RecordSection::RecentCommits);
        let request = build_request(
            &record,
            &AnalysisOptions::default(),
            &SectionRegistry::standard(),
            4000,
        );
        assert!(request
            .prompt
            .contains("could not be retrieved: recent commits"));
    }
}
