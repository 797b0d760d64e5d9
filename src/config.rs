use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Adapter settings read from an optional TOML file.
///
/// ```toml
/// rendezvous_port = 0
/// trace = false
/// log_filter = "info"
///
/// [runtime]
/// executable = "/usr/local/bin/engine-debug"
/// args = ["run"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterConfig {
    /// Port of the rendezvous server; 0 picks a free port.
    pub rendezvous_port: u16,
    /// Ask agents for verbose message tracing.
    pub trace: bool,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    pub runtime: RuntimeConfig,
}

/// How the adapter starts the target program.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Target executable; defaults to this binary.
    pub executable: Option<PathBuf>,
    /// Arguments placed before the program path.
    pub args: Vec<String>,
    /// Environment variable carrying the rendezvous port.
    pub port_env: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            executable: None,
            args: vec!["run".to_string()],
            port_env: "DEBUGGER_PORT".to_string(),
        }
    }
}

impl AdapterConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Arguments of a DAP `launch` request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    pub program: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub stop_on_entry: Option<bool>,
    #[serde(default)]
    pub trace: Option<bool>,
    #[serde(default)]
    pub runtime_executable: Option<PathBuf>,
    #[serde(default)]
    pub runtime_args: Option<Vec<String>>,
}

/// Launch settings after laying the request over the adapter config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: String,
    pub workspace: PathBuf,
    pub stop_on_entry: bool,
    pub trace: bool,
    pub executable: Option<PathBuf>,
    pub args: Vec<String>,
    pub port_env: String,
}

impl LaunchArguments {
    /// Request values win over config values. The workspace defaults to
    /// `fallback_workspace`.
    pub fn resolve(self, config: &AdapterConfig, fallback_workspace: &Path) -> LaunchPlan {
        LaunchPlan {
            program: self.program,
            workspace: self.cwd.unwrap_or_else(|| fallback_workspace.to_path_buf()),
            stop_on_entry: self.stop_on_entry.unwrap_or(true),
            trace: self.trace.unwrap_or(config.trace),
            executable: self
                .runtime_executable
                .or_else(|| config.runtime.executable.clone()),
            args: self
                .runtime_args
                .unwrap_or_else(|| config.runtime.args.clone()),
            port_env: config.runtime.port_env.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: AdapterConfig = toml::from_str("").unwrap();
        assert_eq!(config, AdapterConfig::default());
        assert_eq!(config.runtime.args, vec!["run"]);
    }

    #[test]
    fn launch_request_overrides_config() {
        let config: AdapterConfig = toml::from_str("trace = true\n[runtime]\nargs = [\"x\"]\n").unwrap();
        let args: LaunchArguments = serde_json::from_value(serde_json::json!({
            "program": "main.mod",
            "stopOnEntry": false,
            "runtimeArgs": ["run", "--quiet"],
        }))
        .unwrap();

        let plan = args.resolve(&config, Path::new("/work"));
        assert_eq!(plan.workspace, PathBuf::from("/work"));
        assert!(!plan.stop_on_entry);
        assert!(plan.trace);
        assert_eq!(plan.args, vec!["run", "--quiet"]);
        assert_eq!(plan.port_env, "DEBUGGER_PORT");
    }
}
