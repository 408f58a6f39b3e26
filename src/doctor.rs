use crate::config::Config;
use crate::engine::parser::check_language;
use crate::language::LangId;
use crate::orchestrator::project_root;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub version: String,
    pub languages: Vec<LanguageStatus>,
    pub project: ProjectStatus,
}

#[derive(Debug, Serialize)]
pub struct LanguageStatus {
    pub language: LangId,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser_version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectStatus {
    pub root: String,
    pub readable: bool,
    pub config_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run the doctor check: verify grammars load and the project can be watched.
pub fn run_doctor(config: &Config) -> DoctorReport {
    let languages = LangId::ALL
        .iter()
        .map(|&lang| {
            let available = check_language(lang);
            LanguageStatus {
                language: lang,
                available,
                parser_version: if available {
                    Some(lang.ts_language().abi_version().to_string())
                } else {
                    None
                },
            }
        })
        .collect();

    DoctorReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        languages,
        project: project_status(config),
    }
}

fn project_status(config: &Config) -> ProjectStatus {
    let validation = config.validate();
    let root = project_root(config);
    let error = validation
        .as_ref()
        .err()
        .or(root.as_ref().err())
        .map(|e| e.to_string());

    ProjectStatus {
        root: match &root {
            Ok(r) => r.to_string(),
            Err(_) => config.project_path.display().to_string(),
        },
        readable: root.is_ok(),
        config_valid: validation.is_ok(),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_every_grammar() {
        let report = run_doctor(&Config::default());
        assert_eq!(report.languages.len(), LangId::ALL.len());
        assert!(report.languages.iter().all(|l| l.available));
    }

    #[test]
    fn missing_project_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config {
            project_path: dir.path().join("gone"),
            ..Config::default()
        };
        let report = run_doctor(&config);
        assert!(!report.project.readable);
        assert!(report.project.config_valid);
        assert!(report.project.error.unwrap().contains("PROJECT_NOT_FOUND"));
    }
}
