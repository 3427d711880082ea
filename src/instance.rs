use std::time::Duration;

use log::{debug, info};

use crate::ec2::{Ec2Api, LaunchSpec};
use crate::{Error, Result};

/// States from which an instance never reaches `running`.
const DEAD_STATES: &[&str] = &["shutting-down", "terminated", "stopping", "stopped"];

pub async fn launch<A: Ec2Api + ?Sized>(api: &A, spec: &LaunchSpec) -> Result<String> {
    let id = api.run_instance(spec).await?;
    info!("{} ({}) is starting", id, spec.name);
    Ok(id)
}

/// Polls until EC2 reports the instance as running. There is no deadline, and
/// an id DescribeInstances does not know yet is polled again.
pub async fn wait_until_running<A: Ec2Api + ?Sized>(
    api: &A,
    id: &str,
    interval: Duration,
) -> Result<()> {
    info!("waiting for instance {} to be running...", id);
    loop {
        let status = match api.describe_instance(id).await {
            Ok(status) => status,
            Err(e) if e.is_instance_not_found() => {
                debug!("instance {} not visible yet", id);
                tokio::time::sleep(interval).await;
                continue;
            }
            Err(e) => return Err(e),
        };
        debug!("instance {} is {}", id, status.state);
        if status.state == "running" {
            return Ok(());
        }
        if DEAD_STATES.contains(&status.state.as_str()) {
            return Err(Error::InstanceFailed {
                id: id.to_string(),
                state: status.state,
            });
        }
        tokio::time::sleep(interval).await;
    }
}

pub async fn public_ip<A: Ec2Api + ?Sized>(api: &A, id: &str) -> Result<String> {
    info!("retrieving instance {} public IP...", id);
    let ip = api
        .describe_instance(id)
        .await?
        .public_ip
        .ok_or(Error::MissingField("public ip address"))?;
    info!("public IP: {}", ip);
    Ok(ip)
}

/// Terminates every instance currently in the `running` state.
pub async fn terminate_running<A: Ec2Api + ?Sized>(api: &A) -> Result<Vec<String>> {
    let ids = api.running_instance_ids().await?;
    if ids.is_empty() {
        info!("no running instances");
        return Ok(ids);
    }
    info!("terminating {} instance(s): {}", ids.len(), ids.join(", "));
    api.terminate_instances(&ids).await?;
    Ok(ids)
}
