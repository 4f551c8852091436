use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{NetGuideError, Result};

/// Top-level configuration for NET Guide.
///
/// Loaded from `~/.netguide/config.toml` by default. Each section corresponds
/// to one collaborator of the assessment orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetGuideConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub assessment: AssessmentConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl NetGuideConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NetGuideConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| NetGuideError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the SQLite ledger and exported reports.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.netguide/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Turn-taking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    /// Number of answered turns after which the session is analysed.
    pub question_count: usize,
    /// Maximum answer length in characters.
    pub max_answer_length: usize,
    /// Fallback prompts keyed by ledger position. Positions past the end
    /// reuse the last prompt.
    pub default_prompts: Vec<String>,
    /// Shown once the session is complete.
    pub closing_prompt: String,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            question_count: 5,
            max_answer_length: 2000,
            default_prompts: vec![
                "Tell us about the learning wins and friction you notice most often.".to_string(),
                "When does support seem to help, and what still feels tough?".to_string(),
                "Are there any sensory, focus, or emotional cues we should keep in mind?"
                    .to_string(),
                "Share any accommodations or strategies that already work well.".to_string(),
                "What goal would feel like progress after today?".to_string(),
            ],
            closing_prompt: "Thank you. Ready to see the summary?".to_string(),
        }
    }
}

impl AssessmentConfig {
    /// Fallback prompt for the question at `position` (0-based).
    pub fn default_prompt(&self, position: usize) -> String {
        self.default_prompts
            .get(position)
            .or_else(|| self.default_prompts.last())
            .cloned()
            .unwrap_or_else(|| "Is there anything else you would like to share?".to_string())
    }
}

/// Reasoning service (workflow executor) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// GraphQL endpoint of the workflow executor.
    pub endpoint: String,
    /// Sent as the `x-project-id` header.
    pub project_id: String,
    /// Workflow answering the free-form intake chat. Empty disables the
    /// chat; the assessment then starts from a one-line introduction.
    pub chatbot_workflow_id: String,
    /// Workflow answering question/analysis turns.
    pub assessment_workflow_id: String,
    /// Workflow producing report markup for a session.
    pub report_workflow_id: String,
    /// Environment variable holding the bearer key. The key itself is never
    /// written to the config file.
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/graphql".to_string(),
            project_id: String::new(),
            chatbot_workflow_id: String::new(),
            assessment_workflow_id: String::new(),
            report_workflow_id: String::new(),
            api_key_env: "NETGUIDE_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Ledger store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name inside `general.data_dir`.
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "netguide.db".to_string(),
        }
    }
}
