//! Typed resource specs: the nodes of the desired-state graph.
//!
//! These are plain data. They carry no knowledge of CloudFormation; the
//! `render` layer translates them.

use crate::error::ConfigurationError;
use crate::spec::Arn;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Logical id of a resource inside one declaration (e.g. `Vpc`, `TaskRole`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigurationError> {
        let id = id.into();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigurationError::InvalidLogicalId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How private subnets reach the internet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum NatStrategy {
    /// Managed NAT gateway with an elastic IP.
    Gateway,
    /// A small EC2 instance doing NAT. `session_manager` attaches
    /// `AmazonSSMManagedInstanceCore` to its role.
    Instance {
        instance_type: String,
        session_manager: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSpec {
    pub max_azs: u8,
    /// `None`: no private subnets, workloads get a public IP.
    pub nat: Option<NatStrategy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSpec {
    pub network: LogicalId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    Allow,
}

impl Effect {
    /// Spelling used by IAM policy documents.
    pub fn as_iam(self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<Arn>,
}

/// Runtime identity of the workload plus what it may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPolicySpec {
    /// Service principal allowed to assume the role.
    pub principal: String,
    pub statements: Vec<PolicyStatement>,
}

/// A container image built from a local directory and pushed to a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerAsset {
    pub context: PathBuf,
    /// Hex SHA-256 over the build context contents.
    pub hash: String,
    pub repository: String,
    /// Fully qualified image reference, tagged with `hash`.
    pub image_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum LogDriver {
    AwsLogs { stream_prefix: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: ContainerAsset,
    pub logging: LogDriver,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadSpec {
    pub memory_mib: u32,
    pub cpu: u32,
    pub task_role: LogicalId,
    pub container: ContainerSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    pub cluster: LogicalId,
    pub task_definition: LogicalId,
    pub desired_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Network(NetworkSpec),
    Cluster(ClusterSpec),
    AccessPolicy(AccessPolicySpec),
    Workload(WorkloadSpec),
    Service(ServiceSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceSpec::Network(_) => "network",
            ResourceSpec::Cluster(_) => "cluster",
            ResourceSpec::AccessPolicy(_) => "access_policy",
            ResourceSpec::Workload(_) => "workload",
            ResourceSpec::Service(_) => "service",
        }
    }

    /// Outgoing dependency edges with the kind each target must have.
    pub fn references(&self) -> Vec<(&LogicalId, &'static str)> {
        match self {
            ResourceSpec::Network(_) | ResourceSpec::AccessPolicy(_) => vec![],
            ResourceSpec::Cluster(c) => vec![(&c.network, "network")],
            ResourceSpec::Workload(w) => vec![(&w.task_role, "access_policy")],
            ResourceSpec::Service(s) => {
                vec![(&s.cluster, "cluster"), (&s.task_definition, "workload")]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_ids_must_be_alphanumeric() {
        assert!(LogicalId::new("TaskRole").is_ok());
        assert!(LogicalId::new("Vpc1").is_ok());
        for bad in ["", "Task-Role", "task role", "Vpc/Public"] {
            assert!(
                matches!(LogicalId::new(bad), Err(ConfigurationError::InvalidLogicalId(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn service_references_cluster_and_task() {
        let svc = ResourceSpec::Service(ServiceSpec {
            cluster: LogicalId::new("Cluster").unwrap(),
            task_definition: LogicalId::new("TaskDefinition").unwrap(),
            desired_count: 1,
        });
        let refs: Vec<(&str, &str)> = svc
            .references()
            .into_iter()
            .map(|(r, kind)| (r.as_str(), kind))
            .collect();
        assert_eq!(refs, vec![("Cluster", "cluster"), ("TaskDefinition", "workload")]);
    }
}
