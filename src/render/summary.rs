//! Plain-text view of the resource graph, one line per resource in build order.
//!
//! Example:
//! TaskRole (access_policy)
//! TaskDefinition (workload) <- TaskRole

use crate::model::DesiredState;
use crate::spec::{NatStrategy, ResourceSpec};

pub fn render_summary(state: &DesiredState) -> String {
    let mut out = format!(
        "# {} ({} / {})\n",
        state.stack_name, state.context.account, state.context.region
    );

    for (id, spec) in state.graph.iter_ordered() {
        let mut line = format!("{} ({})", id, spec.kind());
        if let Some(parents) = state.graph.parents.get(id) {
            let deps: Vec<&str> = parents.iter().map(|p| p.as_str()).collect();
            line.push_str(&format!(" <- {}", deps.join(", ")));
        }
        if let Some(detail) = detail(spec) {
            line.push_str(&format!("  [{}]", detail));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn detail(spec: &ResourceSpec) -> Option<String> {
    match spec {
        ResourceSpec::Network(n) => {
            let nat = match &n.nat {
                None => "none".to_string(),
                Some(NatStrategy::Gateway) => "gateway".to_string(),
                Some(NatStrategy::Instance { instance_type, .. }) => {
                    format!("instance {}", instance_type)
                }
            };
            Some(format!("azs={} nat={}", n.max_azs, nat))
        }
        ResourceSpec::Workload(w) => Some(format!(
            "cpu={} memory={}MiB image={}",
            w.cpu, w.memory_mib, w.container.image.image_uri
        )),
        ResourceSpec::Service(s) => Some(format!("desired={}", s.desired_count)),
        ResourceSpec::AccessPolicy(p) => {
            let actions: Vec<&str> = p
                .statements
                .iter()
                .flat_map(|st| st.actions.iter().map(String::as_str))
                .collect();
            Some(actions.join(","))
        }
        ResourceSpec::Cluster(_) => None,
    }
}
