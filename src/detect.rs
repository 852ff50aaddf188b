//! Technology detection from sampled key files.
//!
//! Pure functions over [`KeyFile`]s. Results keep first-detection order and
//! contain no duplicates.

use serde_json::Value;

use repospec_core::models::KeyFile;

/// `package.json` dependency names and the framework each indicates.
const NPM_FRAMEWORKS: &[(&[&str], &str)] = &[
    (&["next"], "Next.js"),
    (&["react"], "React"),
    (&["vue"], "Vue.js"),
    (&["angular", "@angular/core"], "Angular"),
    (&["express"], "Express"),
    (&["fastify"], "Fastify"),
    (&["nestjs", "@nestjs/core"], "NestJS"),
    (&["nuxt"], "Nuxt"),
    (&["svelte"], "Svelte"),
    (&["tailwindcss"], "Tailwind CSS"),
    (&["prisma", "@prisma/client"], "Prisma"),
    (&["drizzle", "drizzle-orm"], "Drizzle"),
    (&["supabase", "@supabase/supabase-js"], "Supabase"),
];

const PYTHON_FRAMEWORKS: &[(&[&str], &str)] = &[
    (&["django"], "Django"),
    (&["flask"], "Flask"),
    (&["fastapi"], "FastAPI"),
    (&["pytorch", "torch"], "PyTorch"),
    (&["tensorflow"], "TensorFlow"),
];

const RUST_FRAMEWORKS: &[(&[&str], &str)] = &[
    (&["actix"], "Actix"),
    (&["rocket"], "Rocket"),
    (&["tokio"], "Tokio"),
];

const GO_FRAMEWORKS: &[(&[&str], &str)] = &[
    (&["gin-gonic"], "Gin"),
    (&["fiber"], "Fiber"),
    (&["echo"], "Echo"),
];

/// Substrings (in any key file, case-insensitive) and the database each indicates.
const DATABASES: &[(&[&str], &str)] = &[
    (&["postgres"], "PostgreSQL"),
    (&["mysql"], "MySQL"),
    (&["mongodb", "mongoose"], "MongoDB"),
    (&["redis"], "Redis"),
    (&["sqlite"], "SQLite"),
    (&["dynamodb"], "DynamoDB"),
    (&["supabase"], "Supabase"),
    (&["firebase"], "Firebase"),
];

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

fn scan_text(content: &str, table: &[(&[&str], &str)], out: &mut Vec<String>) {
    let lower = content.to_lowercase();
    for (needles, name) in table {
        if needles.iter().any(|n| lower.contains(n)) {
            push_unique(out, name);
        }
    }
}

fn scan_package_json(content: &str, out: &mut Vec<String>) {
    let Ok(pkg) = serde_json::from_str::<Value>(content) else {
        // Truncated or malformed manifests are skipped.
        return;
    };
    let has_dep = |name: &str| {
        ["dependencies", "devDependencies"]
            .iter()
            .any(|section| pkg.get(section).and_then(|d| d.get(name)).is_some())
    };
    for (deps, framework) in NPM_FRAMEWORKS {
        if deps.iter().any(|d| has_dep(d)) {
            push_unique(out, framework);
        }
    }
}

pub fn detect_frameworks(files: &[KeyFile]) -> Vec<String> {
    let mut out = Vec::new();
    for file in files {
        match file.name.as_str() {
            "package.json" => scan_package_json(&file.content, &mut out),
            "requirements.txt" | "pyproject.toml" => {
                scan_text(&file.content, PYTHON_FRAMEWORKS, &mut out)
            }
            "Cargo.toml" => scan_text(&file.content, RUST_FRAMEWORKS, &mut out),
            "go.mod" => scan_text(&file.content, GO_FRAMEWORKS, &mut out),
            _ => {}
        }
    }
    out
}

pub fn detect_databases(files: &[KeyFile]) -> Vec<String> {
    let mut out = Vec::new();
    for file in files {
        scan_text(&file.content, DATABASES, &mut out);
    }
    out
}

/// Infrastructure tooling, detected from file names only.
pub fn detect_infrastructure(files: &[KeyFile]) -> Vec<String> {
    let mut out = Vec::new();
    for file in files {
        let name = file.name.as_str();
        if name.contains("docker") || name == "Dockerfile" {
            push_unique(&mut out, "Docker");
        }
        if name.contains("kubernetes") || name.contains("k8s") {
            push_unique(&mut out, "Kubernetes");
        }
        if name == "vercel.json" {
            push_unique(&mut out, "Vercel");
        }
        if name == "netlify.toml" {
            push_unique(&mut out, "Netlify");
        }
        if name == "serverless.yml" {
            push_unique(&mut out, "Serverless Framework");
        }
        if name.contains("terraform") {
            push_unique(&mut out, "Terraform");
        }
        if name.contains("ansible") {
            push_unique(&mut out, "Ansible");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use repospec_core::models::KeyFileKind;

    fn file(name: &str, content: &str) -> KeyFile {
        KeyFile {
            path: name.into(),
            name: name.into(),
            content: content.into(),
            kind: KeyFileKind::Config,
        }
    }

    #[test]
    fn package_json_dependencies() {
        let files = [file(
            "package.json",
            r#"{"dependencies":{"next":"14","react":"18","@prisma/client":"5"},
                "devDependencies":{"tailwindcss":"3"}}"#,
        )];
        assert_eq!(
            detect_frameworks(&files),
            vec!["Next.js", "React", "Tailwind CSS", "Prisma"]
        );
    }

    #[test]
    fn malformed_package_json_is_ignored() {
        let files = [file("package.json", r#"{"dependencies": {"react""#)];
        assert!(detect_frameworks(&files).is_empty());
    }

    #[test]
    fn other_ecosystems_and_dedup() {
        let files = [
            file("requirements.txt", "Django==4.2\ntorch\n"),
            file("pyproject.toml", "django = \"*\""),
            file("Cargo.toml", "[dependencies]\ntokio = \"1\"\n"),
            file("go.mod", "require github.com/gin-gonic/gin v1.9"),
        ];
        assert_eq!(
            detect_frameworks(&files),
            vec!["Django", "PyTorch", "Tokio", "Gin"]
        );
    }

    #[test]
    fn databases_from_any_file() {
        let files = [
            file(".env.example", "DATABASE_URL=postgresql://localhost/app\nREDIS_URL=x"),
            file("docker-compose.yml", "image: postgres:16\n"),
        ];
        assert_eq!(detect_databases(&files), vec!["PostgreSQL", "Redis"]);
    }

    #[test]
    fn infrastructure_from_names() {
        let files = [
            file("Dockerfile", ""),
            file("docker-compose.yml", ""),
            file("k8s.yaml", ""),
            file("vercel.json", ""),
        ];
        assert_eq!(
            detect_infrastructure(&files),
            vec!["Docker", "Kubernetes", "Vercel"]
        );
    }
}
