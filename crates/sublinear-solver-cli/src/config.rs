//! TOML configuration for the CLI.
//!
//! ```toml
//! [solver]
//! epsilon = 1e-8
//! max_iterations = 5000
//! seed = 42
//! timeout_ms = 2000
//! threads = 4
//! ```
//!
//! Every key is optional; request fields override these defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sublinear_solver::types::{
    SolverConfig, DEFAULT_CONFIDENCE_DELTA, DEFAULT_EPSILON, DEFAULT_MAX_ITERATIONS,
    DEFAULT_MAX_WALKS,
};
use tracing::debug;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub solver: SolverSection,
}

/// `[solver]` defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverSection {
    pub epsilon: f64,
    pub max_iterations: usize,
    pub seed: Option<u64>,
    pub max_walks: usize,
    pub confidence_delta: f64,
    pub timeout_ms: Option<u64>,
    pub check_dominance: bool,
    /// Size of the rayon pool used by the random-walk estimator.
    pub threads: Option<usize>,
}

impl Default for SolverSection {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: None,
            max_walks: DEFAULT_MAX_WALKS,
            confidence_delta: DEFAULT_CONFIDENCE_DELTA,
            timeout_ms: None,
            check_dominance: true,
            threads: None,
        }
    }
}

impl Config {
    /// Load from `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.solver;
        if !(s.epsilon.is_finite() && s.epsilon > 0.0) {
            bail!("solver.epsilon must be a positive number, got {}", s.epsilon);
        }
        if s.max_iterations == 0 {
            bail!("solver.max_iterations must be at least 1");
        }
        if s.max_walks == 0 {
            bail!("solver.max_walks must be at least 1");
        }
        if !(s.confidence_delta > 0.0 && s.confidence_delta < 1.0) {
            bail!("solver.confidence_delta must lie in (0, 1), got {}", s.confidence_delta);
        }
        if s.threads == Some(0) {
            bail!("solver.threads must be at least 1");
        }
        Ok(())
    }

    /// Request defaults derived from the `[solver]` section.
    pub fn to_solver_config(&self) -> SolverConfig {
        let s = &self.solver;
        SolverConfig {
            epsilon: s.epsilon,
            max_iterations: s.max_iterations,
            seed: s.seed,
            max_walks: s.max_walks,
            confidence_delta: s.confidence_delta,
            max_time: s.timeout_ms.map(Duration::from_millis),
            check_dominance: s.check_dominance,
            ..SolverConfig::default()
        }
    }

    /// Size the global rayon pool. Must run before any solve.
    pub fn apply_threads(&self) -> Result<()> {
        if let Some(threads) = self.solver.threads {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .context("failed to configure the worker pool")?;
            debug!(threads, "configured rayon pool");
        }
        Ok(())
    }
}
