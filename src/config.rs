//! Stack configuration: an optional TOML file where every field has a default.
//!
//! Example `stack.toml`:
//! ```toml
//! stack_name = "OpenaiDiscordBotStack"
//!
//! [network]
//! max_azs = 1
//! nat = "instance"
//! nat_instance_type = "t3.nano"
//!
//! [workload]
//! build_context = "./containers/chatbot/"
//! character_setting = "./lib/character_setting.txt"
//! ```
//!
//! CLI flags override whatever the file says (see `main.rs`).

use crate::error::ConfigurationError;
use clap::ValueEnum;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt};

const STACK_NAME_RE: &str = r"^[A-Za-z][A-Za-z0-9-]{0,127}$";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
    pub stack_name: String,
    pub network: NetworkConfig,
    pub workload: WorkloadConfig,
    pub secrets: SecretsConfig,
    pub image: ImageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NatMode {
    Gateway,
    Instance,
    None,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub max_azs: u8,
    pub nat: NatMode,
    /// Only used with `nat = "instance"`.
    pub nat_instance_type: String,
    /// Attach the Session Manager managed policy to the NAT instance.
    pub session_manager: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkloadConfig {
    pub memory_mib: u32,
    pub cpu: u32,
    pub desired_count: u32,
    pub container_name: String,
    pub build_context: PathBuf,
    /// Text file inlined as `CHARACTER_SETTING`.
    pub character_setting: PathBuf,
    pub stream_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsConfig {
    /// Parameter Store path prefix, without slashes.
    pub prefix: String,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    pub repository: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl StackConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigurationError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigurationError> {
        let config: StackConfig = toml::from_str(content).map_err(ConfigurationError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks. Task size and file access are checked by the builder.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let re = Regex::new(STACK_NAME_RE).map_err(|e| ConfigurationError::InvalidValue {
            field: "stack_name",
            reason: e.to_string(),
        })?;
        if !re.is_match(&self.stack_name) {
            return Err(ConfigurationError::InvalidValue {
                field: "stack_name",
                reason: format!(
                    "{:?} must start with a letter and contain only letters, digits and '-'",
                    self.stack_name
                ),
            });
        }
        if !(1..=2).contains(&self.network.max_azs) {
            return Err(ConfigurationError::InvalidValue {
                field: "network.max_azs",
                reason: format!("{} is outside 1..=2", self.network.max_azs),
            });
        }
        if self.network.nat == NatMode::Instance && self.network.nat_instance_type.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                field: "network.nat_instance_type",
                reason: "required when nat = \"instance\"".to_string(),
            });
        }
        let name = &self.workload.container_name;
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigurationError::InvalidValue {
                field: "workload.container_name",
                reason: format!("{:?} must be non-empty and alphanumeric", name),
            });
        }
        if self.workload.stream_prefix.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                field: "workload.stream_prefix",
                reason: "cannot be empty".to_string(),
            });
        }
        if self.secrets.names.is_empty() || self.secrets.names.iter().any(|n| n.is_empty()) {
            return Err(ConfigurationError::InvalidValue {
                field: "secrets.names",
                reason: "need at least one non-empty parameter name".to_string(),
            });
        }
        if self.image.repository.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                field: "image.repository",
                reason: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: "OpenaiDiscordBotStack".into(),
            network: NetworkConfig::default(),
            workload: WorkloadConfig::default(),
            secrets: SecretsConfig::default(),
            image: ImageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_azs: 1,
            nat: NatMode::Instance,
            nat_instance_type: "t3.nano".into(),
            session_manager: true,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            memory_mib: 512,
            cpu: 256,
            desired_count: 1,
            container_name: "ChatBotContainer".into(),
            build_context: PathBuf::from("./containers/chatbot/"),
            character_setting: PathBuf::from("./lib/character_setting.txt"),
            stream_prefix: "chatbot".into(),
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            prefix: "openai-discord-bot".into(),
            names: vec!["discord-token".into(), "openai-secret".into()],
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            repository: "openai-discord-bot".into(),
        }
    }
}

impl LoggingConfig {
    /// Initialize the tracing subscriber. `RUST_LOG` wins over the configured level.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        // Logs go to stderr so `synth` can write the template to stdout.
        match self.format.as_str() {
            "json" => {
                fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
            _ => {
                fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}
