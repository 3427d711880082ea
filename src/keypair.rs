use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use log::info;

use crate::ec2::Ec2Api;
use crate::{Error, Result};

/// Makes sure `name` is registered with EC2 and its private key is at `path`.
///
/// An existing local file is reused as is. A remote key without the local
/// file cannot be recovered, since EC2 only hands out key material once.
pub async fn ensure_key_pair<A: Ec2Api + ?Sized>(api: &A, name: &str, path: &Path) -> Result<()> {
    let remote = api.key_pair_names().await?;
    let local = path.exists();
    if remote.iter().any(|k| k == name) && !local {
        return Err(Error::OrphanedKeyPair {
            name: name.to_string(),
            path: path.to_path_buf(),
        });
    }

    if local {
        info!(
            "private key {} already exists, using this file",
            path.display()
        );
        return Ok(());
    }

    info!("creating key pair {}", name);
    let material = api.create_key_pair(name).await?;
    write_private_key(path, &material)?;
    info!("{} written", path.display());
    Ok(())
}

fn write_private_key(path: &Path, material: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(material.as_bytes())?;
    Ok(())
}
