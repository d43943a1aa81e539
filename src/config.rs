//! Configuration loading and validation.
//!
//! The dispatcher reads its YAML configuration exactly once at startup.
//! The raw [`Config`] maps directly onto the file; [`Config::into_runtime`]
//! checks every field and produces a [`RuntimeConfig`] holding parsed
//! addresses and ready-to-use [`BackendTarget`]s.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BackendTarget, DispatchError, Result};

/// Default socket address the HTTP front end binds to.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Default number of selections performed by a load test run.
pub const DEFAULT_LOAD_TEST_REQUESTS: u64 = 10_000;

/// Upper bound on selections in a single load test run.
pub const MAX_LOAD_TEST_REQUESTS: u64 = 1_000_000;

/// Maximum accepted size, in bytes, of an administrative request body.
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024;

/// Raw configuration as deserialized from the YAML file.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Socket address to listen on (default `"127.0.0.1:8080"`).
    #[serde(default)]
    pub listen: Option<String>,
    /// Backends in dispatch order.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    /// Load test settings used by `/admin/load-test`.
    #[serde(default)]
    pub load_test: LoadTestConfig,
}

/// Configuration for a single backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Unique backend identifier (e.g. `"Backend A"`).
    pub id: String,
    /// Relative weight. Must be positive.
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadTestConfig {
    /// Selections per run when the request does not say otherwise.
    #[serde(default = "default_load_test_requests")]
    pub requests: u64,
}

fn default_load_test_requests() -> u64 {
    DEFAULT_LOAD_TEST_REQUESTS
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            requests: default_load_test_requests(),
        }
    }
}

/// Fully validated configuration, created once at startup.
#[derive(Debug)]
pub struct RuntimeConfig {
    /// Socket address the server binds to.
    pub listen: SocketAddr,
    /// Validated backends, in configuration order.
    pub backends: Vec<BackendTarget>,
    /// Default number of selections per load test run.
    pub load_test_requests: u64,
}

impl Config {
    /// Loads configuration from a YAML file at the given path.
    pub fn load_from_file(file_path: &(impl AsRef<Path> + ?Sized)) -> Result<Self> {
        let file = std::fs::File::open(file_path).map_err(|e| {
            DispatchError::Config(format!(
                "failed to open {}: {e}",
                file_path.as_ref().display()
            ))
        })?;

        serde_yaml::from_reader(file)
            .map_err(|e| DispatchError::Config(format!("failed to parse config: {e}")))
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| DispatchError::Config(format!("failed to parse config: {e}")))
    }

    /// Validates all fields, producing a [`RuntimeConfig`].
    ///
    /// At least one backend must be configured and identifiers must be
    /// unique.
    pub fn into_runtime(self) -> Result<RuntimeConfig> {
        if self.backends.is_empty() {
            return Err(DispatchError::Config(
                "at least one backend must be configured".into(),
            ));
        }

        let listen_str = self.listen.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR);
        let listen = listen_str.parse::<SocketAddr>().map_err(|e| {
            DispatchError::Config(format!("invalid listen address \"{listen_str}\": {e}"))
        })?;

        let mut backends: Vec<BackendTarget> = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            if backends.iter().any(|b| b.id() == backend.id) {
                return Err(DispatchError::Config(format!(
                    "duplicate backend id: {}",
                    backend.id
                )));
            }
            let target = BackendTarget::new(backend.id.clone(), backend.weight).map_err(|e| {
                DispatchError::Config(format!("backend \"{}\": {e}", backend.id))
            })?;
            backends.push(target);
        }

        if self.load_test.requests == 0 {
            return Err(DispatchError::Config(
                "load_test.requests must be positive".into(),
            ));
        }
        if self.load_test.requests > MAX_LOAD_TEST_REQUESTS {
            return Err(DispatchError::Config(format!(
                "load_test.requests must not exceed {MAX_LOAD_TEST_REQUESTS}"
            )));
        }

        Ok(RuntimeConfig {
            listen,
            backends,
            load_test_requests: self.load_test.requests,
        })
    }
}
