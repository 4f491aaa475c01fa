//! Project configuration stored in `.lockstep.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CONFIG_FILE: &str = ".lockstep.toml";
pub const DEFAULT_TARGET: &str = "./my-program";
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:3001/";
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Project configuration (TOML).
///
/// Edited by humans; missing fields default to values that let a fresh
/// project run `lockstep check` against `./my-program`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    /// Attempt code shared with the server. Empty for local-only projects.
    pub attempt: String,

    /// Test document to run offline instead of the attempt's tests.
    pub test_plan: String,

    /// Write test input to this file instead of the program's stdin.
    pub input_path: String,

    /// Discard this many leading output lines (unsuppressible banners).
    pub skip_lines: usize,

    /// Per-test wall-clock deadline in seconds.
    pub timeout_secs: u64,

    /// Stdout beyond this many bytes fails the test.
    pub output_limit_bytes: usize,

    /// Base URL of the service.
    pub server: String,

    pub target: TargetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    /// Program and arguments. A leading `-c` runs the rest through the shell.
    pub args: Vec<String>,
    pub shell: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            args: vec![DEFAULT_TARGET.to_string()],
            shell: false,
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            attempt: String::new(),
            test_plan: String::new(),
            input_path: String::new(),
            skip_lines: 0,
            timeout_secs: 5,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            server: DEFAULT_SERVER.to_string(),
            target: TargetConfig::default(),
        }
    }
}

impl ProjectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.target.args.is_empty() || self.target.args[0].trim().is_empty() {
            return Err(anyhow!("target.args must be a non-empty array"));
        }
        if self.target.args[0] == "-c" && self.target.args.len() == 1 {
            return Err(anyhow!("target.args uses -c without a command"));
        }
        if self.server.trim().is_empty() {
            return Err(anyhow!("server must be non-empty"));
        }
        Ok(())
    }

    /// Server base URL, always ending in `/`.
    pub fn server_url(&self) -> String {
        let mut url = self.server.trim().to_string();
        if !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    pub fn input_path(&self) -> Option<PathBuf> {
        (!self.input_path.is_empty()).then(|| PathBuf::from(&self.input_path))
    }

    pub fn test_plan(&self) -> Option<PathBuf> {
        (!self.test_plan.is_empty()).then(|| PathBuf::from(&self.test_plan))
    }

    /// Fill unset fields from `LOCKSTEP_*` environment variables.
    ///
    /// `input_path` and `test_plan` only come from the environment when the
    /// file leaves them empty; `LOCKSTEP_SERVER` always wins.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.input_path.is_empty()
            && let Some(path) = lookup("LOCKSTEP_INPUT_PATH")
        {
            self.input_path = path;
        }
        if self.test_plan.is_empty()
            && let Some(plan) = lookup("LOCKSTEP_TEST_PLAN")
        {
            self.test_plan = plan;
        }
        if let Some(server) = lookup("LOCKSTEP_SERVER") {
            self.server = server;
        }
    }
}

/// Load config from a TOML file, then apply environment overrides.
///
/// If the file is missing, starts from `ProjectConfig::default()`.
pub fn load_config(path: &Path) -> Result<ProjectConfig> {
    let mut cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        debug!(path = %path.display(), "config missing, using defaults");
        ProjectConfig::default()
    };
    cfg.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ProjectConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("toml.tmp");
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        let cfg = ProjectConfig {
            attempt: "abc".to_string(),
            skip_lines: 2,
            target: TargetConfig {
                args: vec!["python".to_string(), "main.py".to_string()],
                shell: false,
            },
            ..ProjectConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        let loaded: ProjectConfig = toml::from_str(&contents).expect("parse");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: ProjectConfig = toml::from_str("attempt = \"x\"\n[target]\nshell = true\n")
            .expect("parse");
        assert_eq!(cfg.attempt, "x");
        assert!(cfg.target.shell);
        assert_eq!(cfg.target.args, vec![DEFAULT_TARGET.to_string()]);
        assert_eq!(cfg.timeout_secs, 5);
        assert_eq!(cfg.output_limit_bytes, DEFAULT_OUTPUT_LIMIT_BYTES);
    }

    #[test]
    fn env_fills_only_empty_paths() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LOCKSTEP_INPUT_PATH", "from-env.txt"),
            ("LOCKSTEP_TEST_PLAN", "plan.org"),
            ("LOCKSTEP_SERVER", "http://example.test"),
        ]);
        let mut cfg = ProjectConfig {
            input_path: "from-file.txt".to_string(),
            ..ProjectConfig::default()
        };
        cfg.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(cfg.input_path, "from-file.txt");
        assert_eq!(cfg.test_plan, "plan.org");
        assert_eq!(cfg.server_url(), "http://example.test/");
    }

    #[test]
    fn rejects_bare_shell_flag() {
        let cfg = ProjectConfig {
            target: TargetConfig {
                args: vec!["-c".to_string()],
                shell: false,
            },
            ..ProjectConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_output_limit() {
        let cfg = ProjectConfig {
            output_limit_bytes: 0,
            ..ProjectConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
