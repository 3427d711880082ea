//! The `KEY=value` file handed to the benchmark scripts: one address per
//! machine role and the path of the private key.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{Error, Result};

const PRIVATE_KEY_FILE: &str = "PRIVATE_KEY_FILE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Standalone,
    Master,
    Slave(u32),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Standalone => write!(f, "INSTANCE_IP"),
            Role::Master => write!(f, "MASTER"),
            Role::Slave(n) => write!(f, "SLAVE_{}", n),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INSTANCE_IP" => Ok(Role::Standalone),
            "MASTER" => Ok(Role::Master),
            _ => s
                .strip_prefix("SLAVE_")
                .and_then(|n| n.parse().ok())
                .map(Role::Slave)
                .ok_or_else(|| Error::MalformedEnvLine(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    addresses: Vec<(Role, String)>,
    private_key: Option<PathBuf>,
}

impl EnvFile {
    pub fn new(private_key: &Path) -> Self {
        EnvFile {
            addresses: Vec::new(),
            private_key: Some(private_key.to_path_buf()),
        }
    }

    /// Records the address of `role`, replacing any earlier one.
    pub fn insert(&mut self, role: Role, ip: &str) {
        match self.addresses.iter_mut().find(|(r, _)| *r == role) {
            Some(entry) => entry.1 = ip.to_string(),
            None => self.addresses.push((role, ip.to_string())),
        }
    }

    pub fn addresses(&self) -> &[(Role, String)] {
        &self.addresses
    }

    pub fn get(&self, role: Role) -> Option<&str> {
        self.addresses
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, ip)| ip.as_str())
    }

    pub fn private_key(&self) -> Option<&Path> {
        self.private_key.as_deref()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (role, ip) in &self.addresses {
            out.push_str(&format!("{}={}\n", role, ip));
        }
        if let Some(key) = &self.private_key {
            out.push_str(&format!("{}={}\n", PRIVATE_KEY_FILE, key.display()));
        }
        out
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut env = EnvFile::default();
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::MalformedEnvLine(line.to_string()))?;
            if key == PRIVATE_KEY_FILE {
                env.private_key = Some(PathBuf::from(value));
            } else {
                env.insert(key.parse()?, value);
            }
        }
        Ok(env)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }
}
