//! Launch parameter validation
//!
//! Turns a host's open request into a concrete command line, working
//! directory and environment overlay, rejecting anything the child could
//! not run under.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::home_dir;
use crate::error::{Error, Result};

/// TERM values a POSIX child may be started with
pub const ALLOWED_TERMS: [&str; 4] = ["linux", "xterm", "xterm-16color", "xterm-256color"];

/// LANG used when neither the request nor the parent provides one
pub const DEFAULT_LANG: &str = "en_US.UTF-8";

/// Native command shell on non-POSIX platforms
const WINDOWS_SHELL: &str = "cmd.exe";

/// A validated description of the child to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: Vec<String>,
    pub cwd: PathBuf,
    /// Overlay applied on top of the inherited parent environment
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Validate and complete launch parameters.
    ///
    /// `cwd` defaults to the home directory and must be an existing directory.
    /// On POSIX a missing `TERM` is taken from `unix_term` and must be on the
    /// allow-list; a missing `LANG` comes from the parent or [`DEFAULT_LANG`].
    pub fn resolve(
        command: Vec<String>,
        cwd: Option<PathBuf>,
        env: BTreeMap<String, String>,
        unix_term: &str,
    ) -> Result<Self> {
        let cwd = match cwd {
            Some(dir) => dir,
            None => home_dir()
                .ok_or_else(|| Error::Configuration("no home directory".to_string()))?,
        };
        if !cwd.is_dir() {
            return Err(Error::Configuration(format!(
                "{} does not exist",
                cwd.display()
            )));
        }

        let command = if cfg!(windows) && command.is_empty() {
            vec![WINDOWS_SHELL.to_string()]
        } else {
            command
        };
        if command.is_empty() {
            return Err(Error::Configuration("empty command".to_string()));
        }

        let env = if cfg!(windows) {
            env
        } else {
            posix_env(env, unix_term, std::env::var("LANG").ok())?
        };

        Ok(Self { command, cwd, env })
    }

    pub fn program(&self) -> &str {
        &self.command[0]
    }

    pub fn args(&self) -> &[String] {
        &self.command[1..]
    }
}

/// Fill in TERM and LANG and check TERM against [`ALLOWED_TERMS`]
fn posix_env(
    mut env: BTreeMap<String, String>,
    unix_term: &str,
    parent_lang: Option<String>,
) -> Result<BTreeMap<String, String>> {
    env.entry("TERM".to_string())
        .or_insert_with(|| unix_term.to_string());
    env.entry("LANG".to_string())
        .or_insert_with(|| parent_lang.unwrap_or_else(|| DEFAULT_LANG.to_string()));

    let term = env.get("TERM").map(String::as_str).unwrap_or_default();
    if !ALLOWED_TERMS.contains(&term) {
        return Err(Error::Configuration(format!("{} is not supported.", term)));
    }
    Ok(env)
}
