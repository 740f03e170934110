//! Desired-state builder: cloud context + stack config -> validated resource graph.
//!
//! Local file reads happen here (character setting, build context) and nowhere
//! else. Nothing in this module talks to the network.

pub mod asset;

use crate::config::{NatMode, StackConfig};
use crate::error::ConfigurationError;
use crate::spec::{
    AccessPolicySpec, Arn, CloudContext, ClusterSpec, ContainerSpec, Declaration, Effect,
    LogDriver, LogicalId, NatStrategy, NetworkSpec, PolicyStatement, ResourceGraph, ResourceSpec,
    ServiceSpec, WorkloadSpec,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const TASK_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";
pub const CHARACTER_SETTING_VAR: &str = "CHARACTER_SETTING";

/// Everything the provisioning engine needs, fully resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesiredState {
    pub stack_name: String,
    pub context: CloudContext,
    pub graph: ResourceGraph,
}

/// Build and validate the declaration. Fails before anything is emitted if a
/// local input is missing or malformed.
pub fn build_desired_state(
    ctx: &CloudContext,
    config: &StackConfig,
) -> Result<DesiredState, ConfigurationError> {
    config.validate()?;
    let wl = &config.workload;

    // 1) Local inputs.
    validate_task_size(wl.cpu, wl.memory_mib)?;
    let character_setting = read_text(&wl.character_setting)?;
    let image = asset::package(ctx, &wl.build_context, &config.image.repository)?;

    // 2) Declare resources, dependencies first.
    let mut decl = Declaration::new();

    let nat = match config.network.nat {
        NatMode::Gateway => Some(NatStrategy::Gateway),
        NatMode::Instance => Some(NatStrategy::Instance {
            instance_type: config.network.nat_instance_type.clone(),
            session_manager: config.network.session_manager,
        }),
        NatMode::None => {
            tracing::warn!("nat = \"none\": tasks run in public subnets with public IPs");
            None
        }
    };
    let vpc = decl.declare(
        LogicalId::new("Vpc")?,
        ResourceSpec::Network(NetworkSpec {
            max_azs: config.network.max_azs,
            nat,
        }),
    );

    let cluster = decl.declare(
        LogicalId::new("Cluster")?,
        ResourceSpec::Cluster(ClusterSpec { network: vpc }),
    );

    let resources = config
        .secrets
        .names
        .iter()
        .map(|name| Arn::ssm_parameter(ctx, &format!("{}/{}", config.secrets.prefix, name)))
        .collect();
    let task_role = decl.declare(
        LogicalId::new("TaskRole")?,
        ResourceSpec::AccessPolicy(AccessPolicySpec {
            principal: TASK_PRINCIPAL.to_string(),
            statements: vec![PolicyStatement {
                effect: Effect::Allow,
                actions: vec!["ssm:GetParameters".to_string()],
                resources,
            }],
        }),
    );

    let mut environment = BTreeMap::new();
    environment.insert(CHARACTER_SETTING_VAR.to_string(), character_setting);
    let task_definition = decl.declare(
        LogicalId::new("TaskDefinition")?,
        ResourceSpec::Workload(WorkloadSpec {
            memory_mib: wl.memory_mib,
            cpu: wl.cpu,
            task_role,
            container: ContainerSpec {
                name: wl.container_name.clone(),
                image,
                logging: LogDriver::AwsLogs {
                    stream_prefix: wl.stream_prefix.clone(),
                },
                environment,
            },
        }),
    );

    decl.declare(
        LogicalId::new("Service")?,
        ResourceSpec::Service(ServiceSpec {
            cluster,
            task_definition,
            desired_count: wl.desired_count,
        }),
    );

    // 3) Validate the graph.
    let graph = decl.validate_and_build()?;
    tracing::info!(
        stack = %config.stack_name,
        account = %ctx.account,
        region = %ctx.region,
        resources = graph.nodes.len(),
        "built desired state"
    );

    Ok(DesiredState {
        stack_name: config.stack_name.clone(),
        context: ctx.clone(),
        graph,
    })
}

/// Read a UTF-8 text file verbatim (no trimming).
fn read_text(path: &Path) -> Result<String, ConfigurationError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigurationError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| ConfigurationError::NotUtf8 {
        path: path.to_path_buf(),
    })
}

/// Fargate accepts only specific cpu/memory pairs.
pub fn validate_task_size(cpu: u32, memory_mib: u32) -> Result<(), ConfigurationError> {
    let ok = match cpu {
        256 => matches!(memory_mib, 512 | 1024 | 2048),
        512 => (1024..=4096).contains(&memory_mib) && memory_mib % 1024 == 0,
        1024 => (2048..=8192).contains(&memory_mib) && memory_mib % 1024 == 0,
        2048 => (4096..=16384).contains(&memory_mib) && memory_mib % 1024 == 0,
        4096 => (8192..=30720).contains(&memory_mib) && memory_mib % 1024 == 0,
        8192 => (16384..=61440).contains(&memory_mib) && memory_mib % 4096 == 0,
        16384 => (32768..=122880).contains(&memory_mib) && memory_mib % 8192 == 0,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidTaskSize { cpu, memory_mib })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        config: StackConfig,
    }

    fn fixture(character: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let context = dir.path().join("chatbot");
        fs::create_dir_all(&context).unwrap();
        fs::write(context.join("Dockerfile"), "FROM python:3.11-slim\n").unwrap();
        fs::write(context.join("main.py"), "print('bot')\n").unwrap();
        let text = dir.path().join("character_setting.txt");
        fs::write(&text, character).unwrap();

        let mut config = StackConfig::default();
        config.workload.build_context = context;
        config.workload.character_setting = text;
        Fixture { _dir: dir, config }
    }

    fn ctx() -> CloudContext {
        CloudContext::new("123456789012", "us-east-1").unwrap()
    }

    fn workload(state: &DesiredState) -> &WorkloadSpec {
        match state.graph.find_kind("workload") {
            Some((_, ResourceSpec::Workload(w))) => w,
            other => panic!("no workload: {other:?}"),
        }
    }

    fn policy(state: &DesiredState) -> &AccessPolicySpec {
        match state.graph.find_kind("access_policy") {
            Some((_, ResourceSpec::AccessPolicy(p))) => p,
            other => panic!("no access policy: {other:?}"),
        }
    }

    #[test]
    fn every_reference_resolves() {
        let fx = fixture("Friendly assistant");
        let state = build_desired_state(&ctx(), &fx.config).unwrap();
        assert_eq!(state.graph.nodes.len(), 5);
        for (id, spec) in &state.graph.nodes {
            for (dep, _) in spec.references() {
                let pos_dep = state.graph.order.iter().position(|i| i == dep).unwrap();
                let pos_self = state.graph.order.iter().position(|i| i == id).unwrap();
                assert!(pos_dep < pos_self, "{dep} must come before {id}");
            }
        }
    }

    #[test]
    fn secret_arns_follow_parameter_pattern() {
        let fx = fixture("Friendly assistant");
        let state = build_desired_state(&ctx(), &fx.config).unwrap();
        let p = policy(&state);
        assert_eq!(p.principal, "ecs-tasks.amazonaws.com");
        assert_eq!(p.statements.len(), 1);
        let st = &p.statements[0];
        assert_eq!(st.effect, Effect::Allow);
        assert_eq!(st.actions, vec!["ssm:GetParameters"]);
        let arns: Vec<String> = st.resources.iter().map(|a| a.to_string()).collect();
        assert_eq!(
            arns,
            vec![
                "arn:aws:ssm:us-east-1:123456789012:parameter/openai-discord-bot/discord-token",
                "arn:aws:ssm:us-east-1:123456789012:parameter/openai-discord-bot/openai-secret",
            ]
        );
    }

    #[test]
    fn character_setting_is_inlined_verbatim() {
        let fx = fixture("Friendly assistant");
        let state = build_desired_state(&ctx(), &fx.config).unwrap();
        let w = workload(&state);
        assert_eq!(w.memory_mib, 512);
        assert_eq!(w.cpu, 256);
        assert_eq!(
            w.container.environment.get("CHARACTER_SETTING").map(String::as_str),
            Some("Friendly assistant")
        );
        assert_eq!(
            w.container.logging,
            LogDriver::AwsLogs {
                stream_prefix: "chatbot".to_string()
            }
        );
    }

    #[test]
    fn surrounding_whitespace_is_kept() {
        let fx = fixture("  You are a cat.\n\n");
        let state = build_desired_state(&ctx(), &fx.config).unwrap();
        assert_eq!(
            workload(&state).container.environment["CHARACTER_SETTING"],
            "  You are a cat.\n\n"
        );
    }

    #[test]
    fn missing_character_file_fails_before_emitting() {
        let mut fx = fixture("x");
        fx.config.workload.character_setting = fx.config.workload.build_context.join("none.txt");
        let err = build_desired_state(&ctx(), &fx.config).unwrap_err();
        assert!(matches!(err, ConfigurationError::ReadFile { .. }));
    }

    #[test]
    fn non_utf8_character_file_is_rejected() {
        let fx = fixture("x");
        fs::write(&fx.config.workload.character_setting, b"\xff\xfe\x00").unwrap();
        let err = build_desired_state(&ctx(), &fx.config).unwrap_err();
        assert!(matches!(err, ConfigurationError::NotUtf8 { .. }));
    }

    #[test]
    fn missing_build_context_fails() {
        let mut fx = fixture("x");
        fx.config.workload.build_context = fx.config.workload.build_context.join("gone");
        let err = build_desired_state(&ctx(), &fx.config).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingBuildContext(_)));
    }

    #[test]
    fn identical_inputs_give_identical_declarations() {
        let fx = fixture("Friendly assistant");
        let a = build_desired_state(&ctx(), &fx.config).unwrap();
        let b = build_desired_state(&ctx(), &fx.config).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn nat_mode_maps_to_strategy() {
        let mut fx = fixture("x");
        fx.config.network.nat = NatMode::Gateway;
        fx.config.network.max_azs = 2;
        let state = build_desired_state(&ctx(), &fx.config).unwrap();
        match state.graph.find_kind("network") {
            Some((_, ResourceSpec::Network(n))) => {
                assert_eq!(n.max_azs, 2);
                assert_eq!(n.nat, Some(NatStrategy::Gateway));
            }
            other => panic!("no network: {other:?}"),
        }

        fx.config.network.nat = NatMode::Instance;
        let state = build_desired_state(&ctx(), &fx.config).unwrap();
        match state.graph.find_kind("network") {
            Some((_, ResourceSpec::Network(n))) => assert_eq!(
                n.nat,
                Some(NatStrategy::Instance {
                    instance_type: "t3.nano".to_string(),
                    session_manager: true,
                })
            ),
            other => panic!("no network: {other:?}"),
        }
    }

    #[test]
    fn task_sizes() {
        assert!(validate_task_size(256, 512).is_ok());
        assert!(validate_task_size(512, 3072).is_ok());
        assert!(validate_task_size(4096, 30720).is_ok());
        assert!(validate_task_size(256, 4096).is_err());
        assert!(validate_task_size(512, 1536).is_err());
        assert!(validate_task_size(300, 512).is_err());
    }
}
