use crate::error::{Result, SiftError};
use crate::model::{ModelMode, ModelSelection};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiftConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Custom path for the session file. Defaults to `~/.config/studysift/session.toml`.
    #[serde(default)]
    pub token_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_mb: default_max_size_mb(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// `local` or `api`. Left unset, the pipeline refuses to start.
    #[serde(default)]
    pub model_mode: Option<String>,
    #[serde(default)]
    pub summary_model: Option<String>,
    #[serde(default)]
    pub json_model: Option<String>,
    /// Pause between reaching 100% and handing off to the results view.
    #[serde(default = "default_completion_delay_ms")]
    pub completion_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_mode: None,
            summary_model: None,
            json_model: None,
            completion_delay_ms: default_completion_delay_ms(),
        }
    }
}

impl PipelineConfig {
    /// Build a model selection from config values, letting explicit overrides win.
    /// Returns `None` unless mode and both models are known.
    pub fn model_selection(
        &self,
        mode: Option<&str>,
        summary_model: Option<&str>,
        json_model: Option<&str>,
    ) -> Option<ModelSelection> {
        let mode = mode.or(self.model_mode.as_deref())?;
        let summary = summary_model.or(self.summary_model.as_deref())?;
        let json = json_model.or(self.json_model.as_deref())?;
        if summary.trim().is_empty() || json.trim().is_empty() {
            return None;
        }
        let mode: ModelMode = mode.parse().ok()?;
        Some(ModelSelection::new(mode, summary, json))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_ics_filename")]
    pub ics_filename: String,
    #[serde(default = "default_prod_id")]
    pub prod_id: String,
    #[serde(default = "default_uid_domain")]
    pub uid_domain: String,
    /// Seconds before the remote export status panel clears itself.
    #[serde(default = "default_status_clear_secs")]
    pub status_clear_secs: u64,
    /// Treat the account as Google-linked even when the session came from
    /// a credential login.
    #[serde(default)]
    pub google_linked: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            ics_filename: default_ics_filename(),
            prod_id: default_prod_id(),
            uid_domain: default_uid_domain(),
            status_clear_secs: default_status_clear_secs(),
            google_linked: false,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_max_size_mb() -> u64 {
    5
}
fn default_completion_delay_ms() -> u64 {
    500
}
fn default_ics_filename() -> String {
    "calendario_eventos.ics".to_string()
}
fn default_prod_id() -> String {
    "-//StudySift//Exported Events//EN".to_string()
}
fn default_uid_domain() -> String {
    "studysift.com".to_string()
}
fn default_status_clear_secs() -> u64 {
    10
}

impl SiftConfig {
    /// Load configuration with layered merge:
    /// 1. ~/.config/studysift/config.toml (global)
    /// 2. .studysift/config.toml (project)
    /// 3. .studysift/config.local.toml (local, gitignored)
    /// 4. `STUDYSIFT_<SECTION>__<KEY>` environment variables
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                builder = builder.add_source(File::from(global_path).required(false));
            }
        }

        if let Some(dir) = project_dir {
            let project_config = dir.join(".studysift").join("config.toml");
            if project_config.exists() {
                builder = builder.add_source(File::from(project_config).required(false));
            }

            let local_config = dir.join(".studysift").join("config.local.toml");
            if local_config.exists() {
                builder = builder.add_source(File::from(local_config).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("STUDYSIFT")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = builder
            .build()
            .map_err(|e| SiftError::Config(e.to_string()))?;

        let mut cfg: Self = config
            .try_deserialize()
            .map_err(|e| SiftError::Config(e.to_string()))?;

        cfg.validate();
        Ok(cfg)
    }

    /// Defaults only, no files.
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Fix out-of-range values in place and log what was changed.
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        let trimmed = self.backend.base_url.trim_end_matches('/').to_string();
        if url::Url::parse(&trimmed).is_err() {
            warnings.push(format!(
                "backend.base_url '{}' is not a valid URL, using {}",
                self.backend.base_url,
                default_base_url()
            ));
            self.backend.base_url = default_base_url();
        } else {
            self.backend.base_url = trimmed;
        }

        if self.backend.timeout_secs == 0 {
            warnings.push(format!(
                "backend.timeout_secs = 0, setting to {}",
                default_timeout_secs()
            ));
            self.backend.timeout_secs = default_timeout_secs();
        }
        if self.backend.connect_timeout_secs == 0 {
            warnings.push("backend.connect_timeout_secs = 0, setting to 1".to_string());
            self.backend.connect_timeout_secs = 1;
        }

        if self.upload.max_size_mb == 0 {
            warnings.push(format!(
                "upload.max_size_mb = 0, setting to {}",
                default_max_size_mb()
            ));
            self.upload.max_size_mb = default_max_size_mb();
        }

        if let Some(mode) = &self.pipeline.model_mode {
            if mode.parse::<ModelMode>().is_err() {
                warnings.push(format!(
                    "unknown pipeline.model_mode '{mode}', valid: local, api; ignoring"
                ));
                self.pipeline.model_mode = None;
            }
        }

        if self.export.ics_filename.trim().is_empty() {
            warnings.push(format!(
                "export.ics_filename is empty, setting to {}",
                default_ics_filename()
            ));
            self.export.ics_filename = default_ics_filename();
        }

        for w in &warnings {
            tracing::warn!("config: {}", w);
        }

        warnings
    }

    /// Where the session file lives.
    pub fn session_path(&self) -> Result<PathBuf> {
        match &self.session.token_path {
            Some(p) => Ok(PathBuf::from(p)),
            None => dirs::config_dir()
                .map(|p| p.join("studysift").join("session.toml"))
                .ok_or_else(|| {
                    SiftError::Config("cannot determine config directory".to_string())
                }),
        }
    }
}

pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("studysift").join("config.toml"))
}
