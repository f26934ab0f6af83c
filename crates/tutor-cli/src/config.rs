//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `$TUTOR_CONFIG` environment variable
//! 2. `~/.config/tutor/config.toml`
//! 3. Built-in defaults (everything is optional)

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use tutor_core::{LevelCurve, SessionConfig, TutorResult};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub progression: ProgressionConfig,
    pub session: SessionSettings,
    pub web: WebConfig,
    pub mcp: McpConfig,
}

/// Database storage settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path. Default: platform-specific data dir.
    pub path: Option<String>,
}

/// Leveling curve: level L -> L+1 costs `base_xp + step_xp * (L - 1)`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    pub base_xp: u64,
    pub step_xp: u64,
}

/// Session accuracy tracking.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Turns kept for the rolling accuracy.
    pub window: usize,
    /// Minimum score for a quality message.
    pub quality_threshold: u8,
}

/// HTTP API settings (`web` feature).
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind: String,
}

/// Tool server settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Custom instructions appended to the server info.
    pub instructions: Option<String>,
}

// --- Defaults ---

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            base_xp: LevelCurve::DEFAULT.base_xp(),
            step_xp: LevelCurve::DEFAULT.step_xp(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            window: defaults.window,
            quality_threshold: defaults.quality_threshold,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7878".into(),
        }
    }
}

impl Config {
    pub fn curve(&self) -> TutorResult<LevelCurve> {
        LevelCurve::new(self.progression.base_xp, self.progression.step_xp)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            window: self.session.window,
            quality_threshold: self.session.quality_threshold.min(100),
        }
    }
}

/// Load config from disk. Returns defaults if no config file exists.
pub fn load_config() -> Result<Config> {
    let path = config_path();

    if let Some(p) = &path {
        if p.exists() {
            let content =
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(config);
        }
    }

    Ok(Config::default())
}

/// Resolve the config file path.
fn config_path() -> Option<PathBuf> {
    // 1. Environment variable
    if let Ok(p) = std::env::var("TUTOR_CONFIG") {
        return Some(PathBuf::from(p));
    }

    // 2. ~/.config/tutor/config.toml
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".config").join("tutor").join("config.toml"))
}

/// Show the active config path (for `tutor config`).
pub fn show_config_path() -> String {
    match config_path() {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.progression.base_xp, 100);
        assert_eq!(config.progression.step_xp, 50);
        assert_eq!(config.session.window, 20);
        assert_eq!(config.session.quality_threshold, 80);
        assert_eq!(config.curve().unwrap(), LevelCurve::DEFAULT);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[progression]
base_xp = 500
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.progression.base_xp, 500);
        // Other fields should be defaults
        assert_eq!(config.progression.step_xp, 50);
        assert_eq!(config.session.window, 20);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[store]
path = "/tmp/test.db"

[progression]
base_xp = 200
step_xp = 25

[session]
window = 10
quality_threshold = 90

[web]
bind = "0.0.0.0:9000"

[mcp]
instructions = "Custom instructions here"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.path.as_deref(), Some("/tmp/test.db"));
        let curve = config.curve().unwrap();
        assert_eq!(curve.xp_for_level(5), 300);
        assert_eq!(config.session_config().window, 10);
        assert_eq!(config.web.bind, "0.0.0.0:9000");
        assert!(config.mcp.instructions.is_some());
    }

    #[test]
    fn test_invalid_curve_rejected() {
        let config: Config = toml::from_str("[progression]\nbase_xp = 0\n").unwrap();
        assert!(config.curve().is_err());
        let flat: Config = toml::from_str("[progression]\nstep_xp = 0\n").unwrap();
        assert!(flat.curve().is_err());
    }
}
