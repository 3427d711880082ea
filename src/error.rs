use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{op} failed: {message}")]
    Aws { op: &'static str, message: String },
    #[error(
        "{name} already exists distantly, but the private key file has not been downloaded. \
         Either delete the remote key or download the associated private key as {}",
        .path.display()
    )]
    OrphanedKeyPair { name: String, path: PathBuf },
    #[error("security group {0} could not be created nor found")]
    SecurityGroupUnavailable(String),
    #[error("aws response is missing {0}")]
    MissingField(&'static str),
    #[error("instance {0} is not visible to DescribeInstances yet")]
    InstanceNotVisible(String),
    #[error("instance {id} entered state {state} while waiting for it to run")]
    InstanceFailed { id: String, state: String },
    #[error("remote session ended before printing {0}")]
    SentinelMissing(String),
    #[error("env file has no {0} entry")]
    EnvEntryMissing(&'static str),
    #[error("malformed env file line: {0}")]
    MalformedEnvLine(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("unknown region: {0}")]
    Region(#[from] rusoto_core::region::ParseRegionError),
    #[error("failed to set up tls for the aws client: {0}")]
    Tls(#[from] rusoto_core::request::TlsError),
    #[error("ssh: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Wraps a rusoto error with the name of the EC2 operation that produced it.
    pub(crate) fn aws<E: std::fmt::Display>(op: &'static str, err: E) -> Self {
        Error::Aws {
            op,
            message: err.to_string(),
        }
    }

    /// EC2 is eventually consistent: a freshly launched id can be unknown to
    /// DescribeInstances for a while.
    pub fn is_instance_not_found(&self) -> bool {
        match self {
            Error::InstanceNotVisible(_) => true,
            Error::Aws { message, .. } => message.contains(INSTANCE_NOT_FOUND),
            _ => false,
        }
    }
}

pub(crate) const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";
