//! Daemon configuration

use runwright_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listen address
    pub listen: String,

    /// Frontend URL advertised on the index endpoint
    pub frontend_url: Option<String>,

    /// Test executable configuration
    pub runner: RunnerConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: runwright_common::DEFAULT_LISTEN.to_string(),
            frontend_url: None,
            runner: RunnerConfig::default(),
        }
    }
}

/// How the external test executable is invoked
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Executable override (auto-detected per platform when unset)
    pub program: Option<String>,

    /// Leading arguments before the per-run arguments
    pub args: Vec<String>,

    /// Reporter passed as `--reporter=<name>`
    pub reporter: String,

    /// Working directory of the test process
    pub workspace_dir: PathBuf,

    /// Directory for per-run test definitions, relative to `workspace_dir`
    /// unless absolute
    pub tests_dir: PathBuf,

    /// Directory screenshots are written to, relative to `workspace_dir`
    /// unless absolute
    pub screenshot_dir: PathBuf,

    /// Progress added per chunk of stdout
    pub progress_step: u8,

    /// Ceiling for stdout-driven progress
    pub progress_cap: u8,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: vec!["playwright".to_string(), "test".to_string()],
            reporter: "json".to_string(),
            workspace_dir: PathBuf::from("."),
            tests_dir: PathBuf::from("tests"),
            screenshot_dir: PathBuf::from("test-results"),
            progress_step: 5,
            progress_cap: 90,
        }
    }
}

impl RunnerConfig {
    /// Resolved scratch directory
    pub fn tests_path(&self) -> PathBuf {
        self.workspace_dir.join(&self.tests_dir)
    }

    pub fn validate(&self) -> Result<()> {
        if self.progress_cap >= 100 {
            return Err(Error::InvalidConfig(format!(
                "progress_cap must be below 100, got {}",
                self.progress_cap
            )));
        }
        if self.reporter.trim().is_empty() {
            return Err(Error::InvalidConfig("reporter must not be empty".to_string()));
        }
        if matches!(&self.program, Some(p) if p.trim().is_empty()) {
            return Err(Error::InvalidConfig("program must not be empty".to_string()));
        }
        Ok(())
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = DaemonConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.listen, "127.0.0.1:5000");
        assert_eq!(config.runner.progress_cap, 90);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("runwright.toml");
        std::fs::write(
            &path,
            "listen = \"0.0.0.0:8080\"\n[runner]\nprogram = \"/usr/local/bin/npx\"\n",
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.runner.program.as_deref(), Some("/usr/local/bin/npx"));
        assert_eq!(config.runner.args, vec!["playwright", "test"]);
        assert_eq!(config.runner.reporter, "json");
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("runwright.toml");

        let mut config = DaemonConfig::default();
        config.frontend_url = Some("http://localhost:4000".to_string());
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.frontend_url.as_deref(), Some("http://localhost:4000"));
    }

    #[test]
    fn test_validate_rejects_full_progress_cap() {
        let runner = RunnerConfig {
            progress_cap: 100,
            ..Default::default()
        };
        assert!(matches!(runner.validate(), Err(Error::InvalidConfig(_))));
        assert!(RunnerConfig::default().validate().is_ok());
    }
}
