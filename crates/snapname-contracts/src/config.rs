use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SETTINGS_FILE: &str = "snapname.json";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_ORACLE: &str = "gemini";

/// Knobs for a single rename run.
///
/// Every field has a default so partial settings files stay valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameConfig {
    pub batch_size: usize,
    /// Pause between successive batch oracle calls. `0` disables the pause.
    pub inter_batch_delay_seconds: u64,
    /// Appended to every produced name; files carrying it are skipped on later runs.
    /// An empty suffix disables the marker.
    pub completion_suffix: String,
    pub oracle_timeout_seconds: u64,
    pub extensions: Vec<String>,
    pub max_image_dimension: u32,
    pub max_title_chars: usize,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            inter_batch_delay_seconds: 5,
            completion_suffix: "_DESC".to_string(),
            oracle_timeout_seconds: 90,
            extensions: ["png", "jpg", "jpeg", "webp"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            max_image_dimension: 1024,
            max_title_chars: 60,
        }
    }
}

impl RenameConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.oracle_timeout_seconds == 0 {
            bail!("oracle_timeout_seconds must be at least 1");
        }
        if self
            .extensions
            .iter()
            .all(|ext| normalize_extension(ext).is_empty())
        {
            bail!("extensions must name at least one file extension");
        }
        if self.max_title_chars == 0 {
            bail!("max_title_chars must be at least 1");
        }
        if !self
            .completion_suffix
            .chars()
            .all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '-')
        {
            bail!("completion_suffix may only contain letters, digits, '_' and '-'");
        }
        Ok(())
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_secs(self.inter_batch_delay_seconds)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_seconds)
    }

    /// Case-insensitive match of `ext` (with or without a leading dot) against `extensions`.
    pub fn accepts_extension(&self, ext: &str) -> bool {
        let wanted = normalize_extension(ext);
        if wanted.is_empty() {
            return false;
        }
        self.extensions
            .iter()
            .any(|candidate| normalize_extension(candidate) == wanted)
    }
}

fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Persisted front-end settings (`snapname.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_folder: Option<PathBuf>,
    pub model: String,
    pub oracle: String,
    pub rename: RenameConfig,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            default_folder: None,
            model: DEFAULT_MODEL.to_string(),
            oracle: DEFAULT_ORACLE.to_string(),
            rename: RenameConfig::default(),
        }
    }
}

impl AppSettings {
    /// Reads settings from `path`.
    ///
    /// A missing file yields defaults. An unreadable or malformed file also yields
    /// defaults, with a warning, so a broken settings file never blocks a run.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "settings unreadable; using defaults");
                return Self::default();
            }
        };
        let mut settings: Self = match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "settings malformed; using defaults");
                return Self::default();
            }
        };
        if settings
            .default_folder
            .as_ref()
            .is_some_and(|folder| !folder.is_dir())
        {
            settings.default_folder = None;
        }
        settings.api_key = settings
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        settings
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Settings file key first, then `GEMINI_API_KEY`, then `GOOGLE_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| non_empty_env("GEMINI_API_KEY"))
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
