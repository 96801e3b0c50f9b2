//! Server launch configuration and environment layering.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How to launch an MCP server over stdio.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra variables for the server, applied over the layered environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Upper bound for blocking calls, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Send non-empty arguments as `{"args": {...}}`, for servers that take
    /// a single model parameter.
    #[serde(default = "default_wrap_arguments")]
    pub wrap_arguments: bool,
}

const fn default_timeout_secs() -> u64 {
    999
}

const fn default_wrap_arguments() -> bool {
    true
}

impl McpServerConfig {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            timeout_secs: default_timeout_secs(),
            wrap_arguments: default_wrap_arguments(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[must_use]
    pub const fn with_wrap_arguments(mut self, wrap: bool) -> Self {
        self.wrap_arguments = wrap;
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Environment for the server process: the current process environment,
    /// then the nearest `.env.local` or `.env`, then [`Self::env`].
    #[must_use]
    pub fn resolve_env(&self) -> HashMap<String, String> {
        let cwd = std::env::current_dir().ok();
        layered_env(std::env::vars(), cwd.as_deref(), &self.env)
    }
}

/// Env files looked up, in priority order.
const ENV_FILES: [&str; 2] = [".env.local", ".env"];

/// Parent directories searched above the starting one.
const ENV_SEARCH_DEPTH: usize = 4;

/// Find the first env file in `start` or up to four parents.
#[must_use]
pub fn find_env_file(start: &Path) -> Option<PathBuf> {
    ENV_FILES.iter().find_map(|name| {
        start
            .ancestors()
            .take(ENV_SEARCH_DEPTH + 1)
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    })
}

fn layered_env(
    base: impl IntoIterator<Item = (String, String)>,
    start: Option<&Path>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = base.into_iter().collect();

    match start.and_then(find_env_file) {
        Some(path) => match dotenvy::from_path_iter(&path) {
            Ok(entries) => {
                for entry in entries {
                    match entry {
                        Ok((key, value)) => {
                            env.insert(key, value);
                        }
                        Err(e) => warn!("Skipping invalid line in {}: {e}", path.display()),
                    }
                }
                debug!("Loaded MCP server env from {}", path.display());
            }
            Err(e) => warn!("Failed to read {}: {e}", path.display()),
        },
        None => debug!("No .env file found for MCP server, using current environment only"),
    }

    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}
