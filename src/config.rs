//! Configuration and shell profile management for bufterm.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.bufterm/config.toml`
//! - Named shell profiles with per-platform filtering
//! - The built-in default profile used when none is marked default
//!
//! # Configuration File
//!
//! ```toml
//! # TERM given to children on POSIX: linux, xterm, xterm-16color, xterm-256color
//! unix_term = "xterm-256color"
//!
//! # Scrollback rows kept per session (0 = unbounded)
//! scrollback_lines = 10000
//!
//! # Grace period between hangup and kill when closing a session
//! close_grace_ms = 500
//!
//! [[shell_configs]]
//! name = "Zsh"
//! cmd = ["/bin/zsh", "-l"]
//! default = true
//! platforms = ["linux", "osx"]
//!
//! [shell_configs.env]
//! EDITOR = "vi"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name that always selects the default profile
pub const DEFAULT_PROFILE_NAME: &str = "Default";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default TERM for children on POSIX platforms
    pub unix_term: String,
    /// Scrollback rows kept per session; 0 means unbounded
    pub scrollback_lines: usize,
    /// Milliseconds between the hangup signal and the forced kill on close
    pub close_grace_ms: u64,
    /// Initial grid height
    pub rows: u16,
    /// Initial grid width
    pub cols: u16,
    /// Named shell profiles
    pub shell_configs: Vec<ShellConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unix_term: "linux".to_string(),
            scrollback_lines: 10_000,
            close_grace_ms: 500,
            rows: 24,
            cols: 80,
            shell_configs: Vec::new(),
        }
    }
}

/// A named shell profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfig {
    pub name: String,
    pub cmd: ShellCommand,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "enabled")]
    pub enable: bool,
    /// Platforms the profile applies to (`linux`, `osx`, `windows`); all when absent
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
    #[serde(default)]
    pub default: bool,
}

fn enabled() -> bool {
    true
}

/// A profile command: either a single program or a full argument vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShellCommand {
    Program(String),
    Args(Vec<String>),
}

impl ShellCommand {
    /// The argument vector; a bare program string is a single argument
    pub fn to_args(&self) -> Vec<String> {
        match self {
            ShellCommand::Program(program) => vec![program.clone()],
            ShellCommand::Args(args) => args.clone(),
        }
    }
}

impl ShellConfig {
    /// An ad-hoc profile for a command given directly by the host
    pub fn ad_hoc(cmd: Vec<String>) -> Self {
        Self {
            name: "bufterm".to_string(),
            cmd: ShellCommand::Args(cmd),
            env: BTreeMap::new(),
            enable: true,
            platforms: None,
            default: false,
        }
    }

    /// The built-in profile: the platform's command shell or a login shell
    pub fn builtin_default() -> Self {
        if cfg!(windows) {
            Self {
                name: "Command Prompt".to_string(),
                cmd: ShellCommand::Program("cmd.exe".to_string()),
                ..Self::ad_hoc(Vec::new())
            }
        } else {
            let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
            Self {
                name: "Login Shell".to_string(),
                cmd: ShellCommand::Args(vec![shell, "-i".to_string(), "-l".to_string()]),
                ..Self::ad_hoc(Vec::new())
            }
        }
    }

    /// Enabled and not excluded from `platform`
    fn available_on(&self, platform: &str) -> bool {
        self.enable
            && self
                .platforms
                .as_ref()
                .map_or(true, |list| list.iter().any(|p| p == platform))
    }
}

/// Platform name as used in profile `platforms` lists
pub fn current_platform() -> &'static str {
    if cfg!(windows) {
        "windows"
    } else if cfg!(target_os = "macos") {
        "osx"
    } else {
        "linux"
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from a specific file. A missing file yields the
    /// defaults silently; an unreadable or malformed one is logged.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Directory holding the config file and log
    pub fn data_dir() -> Option<PathBuf> {
        let dir = home_dir()?.join(".bufterm");
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir)
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        Self::data_dir().map(|dir| dir.join("config.toml"))
    }

    /// Scrollback bound for new sessions (`None` = unbounded)
    pub fn scrollback_limit(&self) -> Option<usize> {
        match self.scrollback_lines {
            0 => None,
            n => Some(n),
        }
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// Profiles usable on this platform, default first. The built-in
    /// profile leads the list when none is marked default.
    pub fn profiles(&self) -> Vec<ShellConfig> {
        self.profiles_for(current_platform())
    }

    fn profiles_for(&self, platform: &str) -> Vec<ShellConfig> {
        let mut ok_configs: Vec<ShellConfig> = Vec::new();
        let mut has_default = false;

        for config in self.shell_configs.iter().filter(|c| c.available_on(platform)) {
            if config.default && !has_default {
                has_default = true;
                ok_configs.insert(0, config.clone());
            } else {
                ok_configs.push(config.clone());
            }
        }

        if !has_default {
            ok_configs.insert(0, ShellConfig::builtin_default());
        }
        ok_configs
    }

    /// The first available profile marked default, else the built-in one
    pub fn default_profile(&self) -> ShellConfig {
        self.default_profile_for(current_platform())
    }

    fn default_profile_for(&self, platform: &str) -> ShellConfig {
        self.shell_configs
            .iter()
            .find(|c| c.available_on(platform) && c.default)
            .cloned()
            .unwrap_or_else(ShellConfig::builtin_default)
    }

    /// Look up a profile by name; `"Default"` always resolves
    pub fn profile_by_name(&self, name: &str) -> Result<ShellConfig> {
        self.profile_by_name_for(name, current_platform())
    }

    fn profile_by_name_for(&self, name: &str, platform: &str) -> Result<ShellConfig> {
        let default = self.default_profile_for(platform);
        if name == DEFAULT_PROFILE_NAME {
            return Ok(default);
        }

        if let Some(config) = self
            .shell_configs
            .iter()
            .find(|c| c.available_on(platform) && c.name == name)
        {
            return Ok(config.clone());
        }

        if name == default.name {
            return Ok(default);
        }
        Err(Error::Configuration(format!("Config {} not found", name)))
    }
}

/// Get home directory
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
unix_term = "xterm-256color"
scrollback_lines = 0

[[shell_configs]]
name = "Python"
cmd = "python3"

[[shell_configs]]
name = "Zsh"
cmd = ["/bin/zsh", "-l"]
default = true
platforms = ["linux", "osx"]

[shell_configs.env]
EDITOR = "vi"

[[shell_configs]]
name = "Disabled"
cmd = "nope"
enable = false

[[shell_configs]]
name = "PowerShell"
cmd = "pwsh.exe"
platforms = ["windows"]
"#;

    fn sample() -> Config {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.unix_term, "linux");
        assert_eq!(config.scrollback_limit(), Some(10_000));
        assert_eq!(config.close_grace(), Duration::from_millis(500));
        assert_eq!((config.rows, config.cols), (24, 80));
    }

    #[test]
    fn test_parse_profiles() {
        let config = sample();
        assert_eq!(config.unix_term, "xterm-256color");
        assert_eq!(config.scrollback_limit(), None);
        assert_eq!(config.cols, 80);
        assert_eq!(config.shell_configs.len(), 4);
        assert_eq!(config.shell_configs[0].cmd.to_args(), vec!["python3"]);
        assert_eq!(config.shell_configs[1].cmd.to_args(), vec!["/bin/zsh", "-l"]);
        assert_eq!(config.shell_configs[1].env.get("EDITOR").map(String::as_str), Some("vi"));
        assert!(config.shell_configs[0].enable);
    }

    #[test]
    fn test_profiles_default_first_and_filtered() {
        let config = sample();
        let names: Vec<String> = config
            .profiles_for("linux")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Zsh", "Python"]);

        let names: Vec<String> = config
            .profiles_for("windows")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names[1..], ["Python".to_string(), "PowerShell".to_string()]);
        assert_eq!(names[0], ShellConfig::builtin_default().name);
    }

    #[test]
    fn test_profile_by_name() {
        let config = sample();
        assert_eq!(config.profile_by_name_for("Default", "linux").unwrap().name, "Zsh");
        assert_eq!(config.profile_by_name_for("Python", "linux").unwrap().name, "Python");
        assert!(matches!(
            config.profile_by_name_for("Disabled", "linux"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            config.profile_by_name_for("PowerShell", "linux"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_builtin_default_resolves_by_name() {
        let config = Config::default();
        let builtin = ShellConfig::builtin_default();
        let found = config.profile_by_name_for(&builtin.name, "linux").unwrap();
        assert_eq!(found, builtin);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config.unix_term, "xterm-256color");
    }

    #[test]
    fn test_load_missing_or_malformed_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::load_from(&dir.path().join("absent.toml"));
        assert_eq!(missing.unix_term, "linux");

        let path = dir.path().join("bad.toml");
        fs::write(&path, "unix_term = [").unwrap();
        let bad = Config::load_from(&path);
        assert_eq!(bad.scrollback_lines, 10_000);
    }
}
