use log::{info, warn};

use crate::config::IngressRule;
use crate::ec2::Ec2Api;
use crate::{Error, Result};

/// Creates the named security group and opens `rules` on it, or adopts the
/// group of that name if creation fails. Rules of an adopted group are left
/// untouched.
pub async fn ensure_security_group<A: Ec2Api + ?Sized>(
    api: &A,
    name: &str,
    description: &str,
    rules: &[IngressRule],
) -> Result<String> {
    let created = create_and_authorize(api, name, description, rules).await;
    let err = match created {
        Ok(id) => return Ok(id),
        Err(e) => e,
    };

    warn!("could not create security group {}: {}", name, err);
    match api.find_security_group(name).await {
        Ok(Some(id)) => {
            info!("security group already exists with id {}", id);
            Ok(id)
        }
        Ok(None) => Err(Error::SecurityGroupUnavailable(name.to_string())),
        Err(e) => {
            warn!("security group lookup failed: {}", e);
            Err(Error::SecurityGroupUnavailable(name.to_string()))
        }
    }
}

async fn create_and_authorize<A: Ec2Api + ?Sized>(
    api: &A,
    name: &str,
    description: &str,
    rules: &[IngressRule],
) -> Result<String> {
    let id = api.create_security_group(name, description).await?;
    info!("created security group {}", id);
    api.authorize_ingress(&id, rules).await?;
    info!("updated security group rules with {:?}", rules);
    Ok(id)
}
