//! Deployment settings, read from an optional TOML file.
//!
//! Every field has a default so that running without a file reproduces the
//! stock deployment: one key pair, one ssh-only security group and Ubuntu
//! instances in `us-east-1`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::Result;

pub const DEFAULT_IMAGE_ID: &str = "ami-0149b2da6ceec4bb0";

/// Installs MySQL and sysbench on a fresh Ubuntu image.
pub const DEFAULT_SETUP_COMMANDS: &[&str] = &[
    "sudo apt-get update -y",
    "sudo DEBIAN_FRONTEND=noninteractive apt-get install -y mysql-server sysbench",
    "sudo systemctl enable --now mysql",
    "echo \"$ROLE setup complete\"",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub region: String,
    /// IAM role to assume through STS before talking to EC2.
    pub assume_role: Option<String>,
    pub key_name: String,
    /// Defaults to `./private_key_<key_name>.pem`.
    pub private_key_file: Option<PathBuf>,
    pub image_id: String,
    /// Startup script handed to every instance as user data.
    pub user_data: Option<PathBuf>,
    pub env_file: PathBuf,
    pub poll_interval_secs: u64,
    pub security_group: SecurityGroupConfig,
    pub standalone: StandaloneConfig,
    pub cluster: ClusterConfig,
    pub remote: RemoteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            region: "us-east-1".to_string(),
            assume_role: None,
            key_name: "PROJECT_KEY".to_string(),
            private_key_file: None,
            image_id: DEFAULT_IMAGE_ID.to_string(),
            user_data: None,
            env_file: PathBuf::from("env_variables.txt"),
            poll_interval_secs: 5,
            security_group: Default::default(),
            standalone: Default::default(),
            cluster: Default::default(),
            remote: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityGroupConfig {
    pub name: String,
    pub description: String,
    pub ingress: Vec<IngressRule>,
}

impl Default for SecurityGroupConfig {
    fn default() -> Self {
        SecurityGroupConfig {
            name: "project-security-group".to_string(),
            description: "Security group for the ec2 instances used in the final project"
                .to_string(),
            ingress: vec![IngressRule::ssh()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngressRule {
    #[serde(default = "IngressRule::default_protocol")]
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    #[serde(default = "IngressRule::default_cidr")]
    pub cidr: String,
}

impl IngressRule {
    pub fn ssh() -> Self {
        IngressRule {
            protocol: Self::default_protocol(),
            from_port: 22,
            to_port: 22,
            cidr: Self::default_cidr(),
        }
    }

    fn default_protocol() -> String {
        "tcp".to_string()
    }

    fn default_cidr() -> String {
        "0.0.0.0/0".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StandaloneConfig {
    pub instance_type: String,
}

impl Default for StandaloneConfig {
    fn default() -> Self {
        StandaloneConfig {
            instance_type: "t2.micro".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub instance_type: String,
    pub slaves: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            instance_type: "t2.micro".to_string(),
            slaves: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub user: String,
    /// Setup script fetched and run on each machine instead of `commands`.
    pub script_url: Option<String>,
    /// Shell commands run on each machine when no `script_url` is set.
    /// `$ROLE` and, on slaves, `$MASTER_IP` are exported beforehand.
    pub commands: Vec<String>,
    pub sentinel: String,
    pub connect_attempts: u32,
    pub connect_delay_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            user: "ubuntu".to_string(),
            script_url: None,
            commands: DEFAULT_SETUP_COMMANDS.iter().map(|c| c.to_string()).collect(),
            sentinel: "PROVISION_SETUP_DONE".to_string(),
            connect_attempts: 10,
            connect_delay_secs: 10,
        }
    }
}

impl RemoteConfig {
    pub fn connect_delay(&self) -> Duration {
        Duration::from_secs(self.connect_delay_secs)
    }
}

impl Config {
    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path)?;
                Self::from_toml(&raw)
            }
            None => Ok(Config::default()),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.private_key_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("./private_key_{}.pem", self.key_name)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Contents of the configured user-data script, if any.
    pub fn user_data(&self) -> Result<Option<String>> {
        match &self.user_data {
            Some(path) => Ok(Some(fs::read_to_string(path)?)),
            None => Ok(None),
        }
    }
}
