//! Spec layer: typed resource declarations + validated graph.
//!
//! No file access or rendering happens here.
//! It owns:
//! - CloudContext (account / region / partition)
//! - Arn (resource identifiers)
//! - Resource specs (the graph nodes)
//! - Declaration -> ResourceGraph validation

pub mod arn;
pub mod context;
pub mod dag;
pub mod resource;

pub use arn::Arn;
pub use context::{CloudContext, validate_region};
pub use dag::{Declaration, ResourceGraph};
pub use resource::{
    AccessPolicySpec, ClusterSpec, ContainerAsset, ContainerSpec, Effect, LogDriver, LogicalId,
    NatStrategy, NetworkSpec, PolicyStatement, ResourceSpec, ServiceSpec, WorkloadSpec,
};
