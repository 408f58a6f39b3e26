//! Documentation artifacts generated from the dependency graph: one API
//! reference page per component and an append-only changelog.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt::Write as _;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::engine::impact::ImpactAnalyzer;
use crate::models::docs::{DocArtifact, DocUpdate, DocValidation, UpdatePlan};

const CHANGELOG_HEADER: &str = "# Context changelog\n";

pub struct DocumentationUpdater {
    root: Utf8PathBuf,
    docs_dir: String,
    last_applied: Option<UpdatePlan>,
}

/// `src/lib/util.ts` -> `src__lib__util.ts`
fn slug(path: &str) -> String {
    path.replace('/', "__")
}

impl DocumentationUpdater {
    pub fn new(root: impl Into<Utf8PathBuf>, docs_dir: &str) -> Self {
        Self {
            root: root.into(),
            docs_dir: docs_dir.trim_matches('/').to_string(),
            last_applied: None,
        }
    }

    pub fn api_reference_path(&self, component: &str) -> String {
        format!("{}/api/{}.md", self.docs_dir, slug(component))
    }

    pub fn changelog_path(&self) -> String {
        format!("{}/CHANGELOG.md", self.docs_dir)
    }

    pub fn last_applied(&self) -> Option<&UpdatePlan> {
        self.last_applied.as_ref()
    }

    /// Build the writes for `components` without touching the filesystem.
    pub fn plan(&self, components: &[String], analyzer: &ImpactAnalyzer) -> UpdatePlan {
        if components.is_empty() {
            return UpdatePlan::default();
        }

        let mut updates = Vec::with_capacity(components.len() + 1);
        for component in components {
            updates.push(self.api_reference(component, analyzer));
        }

        let stamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string());
        let mut entry = format!("\n## {stamp}\n\n");
        for component in components {
            let note = if analyzer.is_known(component) {
                "reference refreshed"
            } else {
                "removed"
            };
            let _ = writeln!(entry, "- `{component}`: {note}");
        }
        updates.push(DocUpdate {
            artifact: DocArtifact::Changelog,
            target: self.changelog_path(),
            components: components.to_vec(),
            references: Vec::new(),
            content: entry,
        });

        UpdatePlan { updates }
    }

    fn api_reference(&self, component: &str, analyzer: &ImpactAnalyzer) -> DocUpdate {
        let summary = analyzer.component_summary(component);
        let mut content = format!("# {component}\n\n");
        let mut references = Vec::new();

        if !summary.known {
            content.push_str("This component was removed from the project.\n");
            if !summary.dependents.is_empty() {
                content.push_str("\nStill imported by:\n\n");
                for dependent in &summary.dependents {
                    let _ = writeln!(content, "- `{dependent}`");
                    if analyzer.is_known(dependent) {
                        references.push(dependent.clone());
                    }
                }
            }
        } else {
            content.push_str("## Exports\n\n");
            if summary.exports.is_empty() {
                content.push_str("_none_\n");
            }
            for export in &summary.exports {
                let _ = writeln!(content, "- `{export}`");
            }

            content.push_str("\n## Depends on\n\n");
            let mut missing = Vec::new();
            if summary.dependencies.is_empty() {
                content.push_str("_none_\n");
            }
            for dep in &summary.dependencies {
                if analyzer.is_known(dep) {
                    let _ = writeln!(content, "- `{dep}`");
                    references.push(dep.clone());
                } else {
                    missing.push(dep);
                }
            }
            if !missing.is_empty() {
                content.push_str("\n## Unresolved imports\n\n");
                for dep in missing {
                    let _ = writeln!(content, "- `{dep}` (removed)");
                }
            }

            content.push_str("\n## Used by\n\n");
            if summary.dependents.is_empty() {
                content.push_str("_none_\n");
            }
            for dependent in &summary.dependents {
                let _ = writeln!(content, "- `{dependent}`");
                references.push(dependent.clone());
            }
        }

        DocUpdate {
            artifact: DocArtifact::ApiReference,
            target: self.api_reference_path(component),
            components: vec![component.to_string()],
            references,
            content,
        }
    }

    /// Write every update in `plan`. Returns the project-relative paths written.
    pub async fn apply(&mut self, plan: &UpdatePlan) -> Result<Vec<String>> {
        let mut written = Vec::with_capacity(plan.updates.len());
        for update in &plan.updates {
            let path = self.root.join(&update.target);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {parent}"))?;
            }

            match update.artifact {
                DocArtifact::ApiReference => {
                    tokio::fs::write(&path, &update.content)
                        .await
                        .with_context(|| format!("Failed to write {path}"))?;
                }
                DocArtifact::Changelog => {
                    let mut existing = match tokio::fs::read_to_string(&path).await {
                        Ok(s) => s,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            CHANGELOG_HEADER.to_string()
                        }
                        Err(e) => {
                            return Err(e).with_context(|| format!("Failed to read {path}"));
                        }
                    };
                    existing.push_str(&update.content);
                    tokio::fs::write(&path, existing)
                        .await
                        .with_context(|| format!("Failed to write {path}"))?;
                }
            }
            debug!(artifact = %update.target, "documentation written");
            written.push(update.target.clone());
        }

        self.last_applied = Some(plan.clone());
        Ok(written)
    }

    /// Check the last applied plan against the current tree.
    pub fn validate(&self) -> DocValidation {
        let Some(plan) = &self.last_applied else {
            return DocValidation {
                valid: true,
                issues: Vec::new(),
            };
        };

        let mut issues = Vec::new();
        for update in &plan.updates {
            let path = self.root.join(&update.target);
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(_) => {
                    issues.push(format!("missing artifact {}", update.target));
                    continue;
                }
            };

            if update.artifact == DocArtifact::Changelog {
                for component in &update.components {
                    if !content.contains(&format!("`{component}`")) {
                        issues.push(format!("changelog has no entry for {component}"));
                    }
                }
            }

            for reference in &update.references {
                if !exists(&self.root, reference) {
                    issues.push(format!(
                        "{} references missing file {reference}",
                        update.target
                    ));
                }
            }
        }

        DocValidation {
            valid: issues.is_empty(),
            issues,
        }
    }
}

fn exists(root: &Utf8Path, rel: &str) -> bool {
    root.join(rel).is_file()
}
