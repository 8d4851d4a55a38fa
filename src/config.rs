//! Server configuration stored in a TOML file.
//!
//! Every section is optional; a missing file means all defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::reasoning::{KnowledgeBase, SessionOptions, MAX_SOLUTIONS};

// =============================================================================
// Config Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub query: QuerySection,
    #[serde(default)]
    pub knowledge: KnowledgeBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    /// Name reported in `serverInfo`
    #[serde(default = "default_name")]
    pub name: String,
}

fn default_name() -> String {
    "prolog-mcp".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    /// Load the knowledge base at startup
    #[serde(default = "default_true")]
    pub seed: bool,
    /// Load it again after every resetProlog
    #[serde(default)]
    pub reseed_on_reset: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            seed: true,
            reseed_on_reset: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySection {
    /// Solutions materialized per query
    #[serde(default = "default_max_solutions")]
    pub max_solutions: usize,
    /// Wall-clock budget per query, unlimited when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_max_solutions() -> usize {
    MAX_SOLUTIONS
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            max_solutions: default_max_solutions(),
            timeout_ms: None,
        }
    }
}

// =============================================================================
// Load / Validate
// =============================================================================

impl Config {
    /// Load from `path`, or defaults when no path is given or the file is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.max_solutions == 0 {
            bail!("query.max_solutions must be at least 1");
        }
        if self.query.timeout_ms == Some(0) {
            bail!("query.timeout_ms must be at least 1 when set");
        }
        if self.server.name.trim().is_empty() {
            bail!("server.name must not be empty");
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            knowledge: self.knowledge.clone(),
            seed: self.session.seed,
            reseed_on_reset: self.session.reseed_on_reset,
            max_solutions: self.query.max_solutions,
            query_timeout: self.query.timeout_ms.map(Duration::from_millis),
        }
    }
}
