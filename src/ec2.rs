//! The slice of the EC2 API the provisioning flow needs.

use std::str::FromStr;

use async_trait::async_trait;
use log::debug;
use rusoto_core::credential::{AutoRefreshingProvider, DefaultCredentialsProvider};
use rusoto_core::{Client, HttpClient, Region};
use rusoto_ec2::{
    AuthorizeSecurityGroupIngressRequest, CreateKeyPairRequest, CreateSecurityGroupRequest,
    DescribeInstancesRequest, DescribeKeyPairsRequest, DescribeSecurityGroupsRequest, Ec2,
    Ec2Client, Filter, IpPermission, IpRange, RunInstancesMonitoringEnabled, RunInstancesRequest,
    Tag, TagSpecification, TerminateInstancesRequest,
};
use rusoto_sts::{StsAssumeRoleSessionCredentialsProvider, StsClient};

use crate::config::IngressRule;
use crate::error::INSTANCE_NOT_FOUND;
use crate::{Error, Result};

/// Everything needed for a single RunInstances call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub security_group_id: String,
    pub key_name: String,
    pub user_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStatus {
    pub state: String,
    pub public_ip: Option<String>,
}

#[async_trait]
pub trait Ec2Api: Send + Sync {
    async fn key_pair_names(&self) -> Result<Vec<String>>;
    /// Registers a new key pair and returns its private key material.
    async fn create_key_pair(&self, name: &str) -> Result<String>;
    async fn create_security_group(&self, name: &str, description: &str) -> Result<String>;
    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> Result<()>;
    async fn find_security_group(&self, name: &str) -> Result<Option<String>>;
    async fn run_instance(&self, spec: &LaunchSpec) -> Result<String>;
    async fn describe_instance(&self, id: &str) -> Result<InstanceStatus>;
    async fn running_instance_ids(&self) -> Result<Vec<String>>;
    async fn terminate_instances(&self, ids: &[String]) -> Result<()>;
}

/// Builds the EC2 client used for the whole run.
///
/// With `assume_role` set, credentials come from an STS session for that role,
/// otherwise from the default provider chain.
pub fn connect(region: &str, assume_role: Option<&str>) -> Result<Ec2Client> {
    let region = Region::from_str(region)?;
    let client = match assume_role {
        Some(role_arn) => {
            debug!("assuming role {}", role_arn);
            let sts = StsClient::new(region.clone());
            let provider = StsAssumeRoleSessionCredentialsProvider::new(
                sts,
                role_arn.to_string(),
                "provision".to_string(),
                None,
                None,
                None,
                None,
            );
            let provider = AutoRefreshingProvider::new(provider)
                .map_err(|e| Error::aws("AssumeRole", e))?;
            Client::new_with(provider, HttpClient::new()?)
        }
        None => {
            let provider =
                DefaultCredentialsProvider::new().map_err(|e| Error::aws("LoadCredentials", e))?;
            Client::new_with(provider, HttpClient::new()?)
        }
    };
    Ok(Ec2Client::new_with_client(client, region))
}

fn ip_permission(rule: &IngressRule) -> IpPermission {
    IpPermission {
        ip_protocol: Some(rule.protocol.clone()),
        from_port: Some(i64::from(rule.from_port)),
        to_port: Some(i64::from(rule.to_port)),
        ip_ranges: Some(vec![IpRange {
            cidr_ip: Some(rule.cidr.clone()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// One instance per request, with detailed monitoring and a `Name` tag.
fn run_instances_request(spec: &LaunchSpec) -> RunInstancesRequest {
    RunInstancesRequest {
        image_id: Some(spec.image_id.clone()),
        instance_type: Some(spec.instance_type.clone()),
        min_count: 1,
        max_count: 1,
        monitoring: Some(RunInstancesMonitoringEnabled { enabled: true }),
        security_group_ids: Some(vec![spec.security_group_id.clone()]),
        key_name: Some(spec.key_name.clone()),
        user_data: spec.user_data.as_ref().map(base64::encode),
        tag_specifications: Some(vec![TagSpecification {
            resource_type: Some("instance".to_string()),
            tags: Some(vec![Tag {
                key: Some("Name".to_string()),
                value: Some(spec.name.clone()),
            }]),
        }]),
        ..Default::default()
    }
}

fn filter(name: &str, value: &str) -> Filter {
    Filter {
        name: Some(name.to_string()),
        values: Some(vec![value.to_string()]),
    }
}

#[async_trait]
impl Ec2Api for Ec2Client {
    async fn key_pair_names(&self) -> Result<Vec<String>> {
        let res = self
            .describe_key_pairs(DescribeKeyPairsRequest::default())
            .await
            .map_err(|e| Error::aws("DescribeKeyPairs", e))?;
        Ok(res
            .key_pairs
            .unwrap_or_default()
            .into_iter()
            .filter_map(|kp| kp.key_name)
            .collect())
    }

    async fn create_key_pair(&self, name: &str) -> Result<String> {
        let req = CreateKeyPairRequest {
            key_name: name.to_string(),
            ..Default::default()
        };
        let res = Ec2::create_key_pair(self, req)
            .await
            .map_err(|e| Error::aws("CreateKeyPair", e))?;
        res.key_material.ok_or(Error::MissingField("key material"))
    }

    async fn create_security_group(&self, name: &str, description: &str) -> Result<String> {
        let req = CreateSecurityGroupRequest {
            group_name: name.to_string(),
            description: description.to_string(),
            ..Default::default()
        };
        let res = Ec2::create_security_group(self, req)
            .await
            .map_err(|e| Error::aws("CreateSecurityGroup", e))?;
        res.group_id.ok_or(Error::MissingField("security group id"))
    }

    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> Result<()> {
        let req = AuthorizeSecurityGroupIngressRequest {
            group_id: Some(group_id.to_string()),
            ip_permissions: Some(rules.iter().map(ip_permission).collect()),
            ..Default::default()
        };
        self.authorize_security_group_ingress(req)
            .await
            .map_err(|e| Error::aws("AuthorizeSecurityGroupIngress", e))?;
        Ok(())
    }

    async fn find_security_group(&self, name: &str) -> Result<Option<String>> {
        let req = DescribeSecurityGroupsRequest {
            filters: Some(vec![filter("group-name", name)]),
            ..Default::default()
        };
        let res = self
            .describe_security_groups(req)
            .await
            .map_err(|e| Error::aws("DescribeSecurityGroups", e))?;
        Ok(res
            .security_groups
            .unwrap_or_default()
            .into_iter()
            .find_map(|sg| sg.group_id))
    }

    async fn run_instance(&self, spec: &LaunchSpec) -> Result<String> {
        let req = run_instances_request(spec);
        let reservation = self
            .run_instances(req)
            .await
            .map_err(|e| Error::aws("RunInstances", e))?;
        reservation
            .instances
            .unwrap_or_default()
            .into_iter()
            .find_map(|i| i.instance_id)
            .ok_or(Error::MissingField("instance id"))
    }

    async fn describe_instance(&self, id: &str) -> Result<InstanceStatus> {
        let req = DescribeInstancesRequest {
            instance_ids: Some(vec![id.to_string()]),
            ..Default::default()
        };
        let res = self.describe_instances(req).await.map_err(|e| {
            let msg = e.to_string();
            if msg.contains(INSTANCE_NOT_FOUND) {
                Error::InstanceNotVisible(id.to_string())
            } else {
                Error::aws("DescribeInstances", msg)
            }
        })?;
        let instance = res
            .reservations
            .unwrap_or_default()
            .into_iter()
            .flat_map(|r| r.instances.unwrap_or_default())
            .next()
            .ok_or_else(|| Error::InstanceNotVisible(id.to_string()))?;
        let state = instance
            .state
            .and_then(|s| s.name)
            .ok_or(Error::MissingField("instance state"))?;
        Ok(InstanceStatus {
            state,
            public_ip: instance.public_ip_address,
        })
    }

    async fn running_instance_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut req = DescribeInstancesRequest {
            filters: Some(vec![filter("instance-state-name", "running")]),
            ..Default::default()
        };
        loop {
            let res = self
                .describe_instances(req.clone())
                .await
                .map_err(|e| Error::aws("DescribeInstances", e))?;
            ids.extend(
                res.reservations
                    .unwrap_or_default()
                    .into_iter()
                    .flat_map(|r| r.instances.unwrap_or_default())
                    .filter_map(|i| i.instance_id),
            );
            match res.next_token {
                Some(token) => req.next_token = Some(token),
                None => break,
            }
        }
        Ok(ids)
    }

    async fn terminate_instances(&self, ids: &[String]) -> Result<()> {
        let req = TerminateInstancesRequest {
            instance_ids: ids.to_vec(),
            ..Default::default()
        };
        Ec2::terminate_instances(self, req)
            .await
            .map_err(|e| Error::aws("TerminateInstances", e))?;
        Ok(())
    }
}
