//! CloudFormation adapter: translate a validated graph into a template.
//!
//! Each graph node expands to one or more CloudFormation resources whose
//! logical ids are prefixed with the node's id (`Vpc` -> `VpcPublicSubnet1Subnet`).
//! `serde_json::Value` objects keep keys sorted, so the output is stable.

use crate::model::DesiredState;
use crate::spec::{
    AccessPolicySpec, CloudContext, LogDriver, LogicalId, NatStrategy, NetworkSpec, ResourceSpec,
    ServiceSpec, WorkloadSpec,
};
use anyhow::{Context, bail};
use serde_json::{Map, Value, json};

const VPC_CIDR: &str = "10.0.0.0/16";
const NAT_AMI_PARAMETER: &str =
    "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-x86_64";

/// NAT instance bootstrap: enable forwarding and masquerade the VPC range.
const NAT_USER_DATA: &str = "#!/bin/bash\n\
yum install -y iptables-services\n\
echo 'net.ipv4.ip_forward=1' > /etc/sysctl.d/90-nat.conf\n\
sysctl --system\n\
iface=$(ip route | awk '/default/ {print $5; exit}')\n\
iptables -t nat -A POSTROUTING -o \"$iface\" -j MASQUERADE\n\
iptables -F FORWARD\n\
service iptables save\n\
systemctl enable --now iptables\n";

/// Render a complete template as pretty-printed JSON.
pub fn render_template(state: &DesiredState) -> anyhow::Result<String> {
    let template = build_template(state)?;
    Ok(serde_json::to_string_pretty(&template)? + "\n")
}

/// Build the template as a JSON value.
pub fn build_template(state: &DesiredState) -> anyhow::Result<Value> {
    let mut t = Template::new(&state.context);

    for (id, spec) in state.graph.iter_ordered() {
        match spec {
            ResourceSpec::Network(n) => t.network(id, n),
            ResourceSpec::Cluster(_) => t.cluster(id),
            ResourceSpec::AccessPolicy(p) => t.access_policy(id, p),
            ResourceSpec::Workload(w) => t.workload(id, w),
            ResourceSpec::Service(s) => {
                let network = network_of(state, s)
                    .with_context(|| format!("resolve network for service {}", id))?;
                let task_role = task_role_of(state, s)
                    .with_context(|| format!("resolve task role for service {}", id))?;
                t.service(id, s, network, task_role);
            }
        }
    }

    Ok(json!({
        "AWSTemplateFormatVersion": "2010-09-09",
        "Description": format!("{} (Discord chat bot on Fargate)", state.stack_name),
        "Resources": Value::Object(t.resources),
        "Outputs": Value::Object(t.outputs),
    }))
}

/// Service -> cluster -> network.
fn network_of<'a>(
    state: &'a DesiredState,
    service: &ServiceSpec,
) -> anyhow::Result<(&'a LogicalId, &'a NetworkSpec)> {
    let Some(ResourceSpec::Cluster(cluster)) = state.graph.get(&service.cluster) else {
        bail!("{} is not a cluster", service.cluster);
    };
    match state.graph.nodes.get_key_value(&cluster.network) {
        Some((id, ResourceSpec::Network(n))) => Ok((id, n)),
        _ => bail!("{} is not a network", cluster.network),
    }
}

/// Service -> task definition -> task role.
fn task_role_of<'a>(
    state: &'a DesiredState,
    service: &ServiceSpec,
) -> anyhow::Result<&'a LogicalId> {
    match state.graph.get(&service.task_definition) {
        Some(ResourceSpec::Workload(w)) => Ok(&w.task_role),
        _ => bail!("{} is not a workload", service.task_definition),
    }
}

fn r#ref(id: &str) -> Value {
    json!({ "Ref": id })
}

fn get_att(id: &str, attr: &str) -> Value {
    json!({ "Fn::GetAtt": [id, attr] })
}

fn assume_role(service: &str) -> Value {
    json!({
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": service },
        }],
        "Version": "2012-10-17",
    })
}

/// A single string when there is one entry, a list otherwise.
fn one_or_many(items: Vec<String>) -> Value {
    if items.len() == 1 {
        Value::String(items.into_iter().next().unwrap_or_default())
    } else {
        Value::from(items)
    }
}

struct Template<'a> {
    ctx: &'a CloudContext,
    resources: Map<String, Value>,
    outputs: Map<String, Value>,
}

impl<'a> Template<'a> {
    fn new(ctx: &'a CloudContext) -> Self {
        Self {
            ctx,
            resources: Map::new(),
            outputs: Map::new(),
        }
    }

    fn add(&mut self, id: String, ty: &str, properties: Value) {
        self.add_raw(id, json!({ "Type": ty, "Properties": properties }));
    }

    fn add_raw(&mut self, id: String, resource: Value) {
        self.resources.insert(id, resource);
    }

    fn output(&mut self, name: &str, value: Value) {
        self.outputs.insert(name.to_string(), json!({ "Value": value }));
    }

    fn managed_policy(&self, name: &str) -> String {
        format!("arn:{}:iam::aws:policy/{}", self.ctx.partition, name)
    }

    fn tag_name(&self, name: &str) -> Value {
        json!([{ "Key": "Name", "Value": name }])
    }

    fn network(&mut self, id: &LogicalId, n: &NetworkSpec) {
        let vpc = id.to_string();
        let igw = format!("{vpc}IGW");
        let attach = format!("{vpc}VPCGW");

        self.add(
            vpc.clone(),
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": VPC_CIDR,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": self.tag_name(&vpc),
            }),
        );
        self.add(
            igw.clone(),
            "AWS::EC2::InternetGateway",
            json!({ "Tags": self.tag_name(&vpc) }),
        );
        self.add(
            attach.clone(),
            "AWS::EC2::VPCGatewayAttachment",
            json!({ "InternetGatewayId": r#ref(&igw), "VpcId": r#ref(&vpc) }),
        );

        // Public subnets take the lower half of the /16, private ones the upper half.
        for az in 0..n.max_azs {
            let subnet = format!("{vpc}PublicSubnet{}", az + 1);
            self.subnet(&vpc, &subnet, az, true);
            self.add_raw(
                format!("{subnet}DefaultRoute"),
                json!({
                    "Type": "AWS::EC2::Route",
                    "Properties": {
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "GatewayId": r#ref(&igw),
                        "RouteTableId": r#ref(&format!("{subnet}RouteTable")),
                    },
                    "DependsOn": [attach],
                }),
            );
        }

        let Some(nat) = &n.nat else {
            return;
        };

        // One NAT in the first public subnet, shared by every private subnet.
        let first_public = format!("{vpc}PublicSubnet1");
        let (target_key, target) = match nat {
            NatStrategy::Gateway => {
                let eip = format!("{first_public}EIP");
                let gw = format!("{first_public}NATGateway");
                self.add(eip.clone(), "AWS::EC2::EIP", json!({ "Domain": "vpc" }));
                self.add_raw(
                    gw.clone(),
                    json!({
                        "Type": "AWS::EC2::NatGateway",
                        "Properties": {
                            "AllocationId": get_att(&eip, "AllocationId"),
                            "SubnetId": r#ref(&format!("{first_public}Subnet")),
                            "Tags": self.tag_name(&first_public),
                        },
                        "DependsOn": [format!("{first_public}DefaultRoute")],
                    }),
                );
                ("NatGatewayId", r#ref(&gw))
            }
            NatStrategy::Instance {
                instance_type,
                session_manager,
            } => {
                let sg = format!("{vpc}NatSecurityGroup");
                let role = format!("{vpc}NatRole");
                let profile = format!("{vpc}NatInstanceProfile");
                let instance = format!("{first_public}NatInstance");

                self.add(
                    sg.clone(),
                    "AWS::EC2::SecurityGroup",
                    json!({
                        "GroupDescription": format!("{vpc} NAT instance"),
                        "SecurityGroupEgress": [{ "CidrIp": "0.0.0.0/0", "IpProtocol": "-1" }],
                        "SecurityGroupIngress": [{ "CidrIp": VPC_CIDR, "IpProtocol": "-1" }],
                        "VpcId": r#ref(&vpc),
                    }),
                );

                let mut role_props = json!({
                    "AssumeRolePolicyDocument": assume_role("ec2.amazonaws.com"),
                });
                if *session_manager {
                    role_props["ManagedPolicyArns"] =
                        json!([self.managed_policy("AmazonSSMManagedInstanceCore")]);
                }
                self.add(role.clone(), "AWS::IAM::Role", role_props);
                self.add(
                    profile.clone(),
                    "AWS::IAM::InstanceProfile",
                    json!({ "Roles": [r#ref(&role)] }),
                );
                self.add_raw(
                    instance.clone(),
                    json!({
                        "Type": "AWS::EC2::Instance",
                        "Properties": {
                            "IamInstanceProfile": r#ref(&profile),
                            "ImageId": format!("{{{{resolve:ssm:{NAT_AMI_PARAMETER}}}}}"),
                            "InstanceType": instance_type,
                            "SecurityGroupIds": [get_att(&sg, "GroupId")],
                            "SourceDestCheck": false,
                            "SubnetId": r#ref(&format!("{first_public}Subnet")),
                            "Tags": self.tag_name(&instance),
                            "UserData": { "Fn::Base64": NAT_USER_DATA },
                        },
                        "DependsOn": [role],
                    }),
                );
                ("InstanceId", r#ref(&instance))
            }
        };

        for az in 0..n.max_azs {
            let subnet = format!("{vpc}PrivateSubnet{}", az + 1);
            self.subnet(&vpc, &subnet, az, false);
            let mut route = json!({
                "DestinationCidrBlock": "0.0.0.0/0",
                "RouteTableId": r#ref(&format!("{subnet}RouteTable")),
            });
            route[target_key] = target.clone();
            self.add(format!("{subnet}DefaultRoute"), "AWS::EC2::Route", route);
        }
    }

    /// Subnet + route table + association. /18 blocks: public 0 and 64, private 128 and 192.
    fn subnet(&mut self, vpc: &str, prefix: &str, az: u8, public: bool) {
        let offset = (if public { 0 } else { 128 }) + u32::from(az) * 64;
        let kind = if public { "Public" } else { "Private" };
        self.add(
            format!("{prefix}Subnet"),
            "AWS::EC2::Subnet",
            json!({
                "AvailabilityZone": { "Fn::Select": [az, { "Fn::GetAZs": "" }] },
                "CidrBlock": format!("10.0.{offset}.0/18"),
                "MapPublicIpOnLaunch": public,
                "Tags": [
                    { "Key": "Name", "Value": prefix },
                    { "Key": "SubnetType", "Value": kind },
                ],
                "VpcId": r#ref(vpc),
            }),
        );
        self.add(
            format!("{prefix}RouteTable"),
            "AWS::EC2::RouteTable",
            json!({ "Tags": self.tag_name(prefix), "VpcId": r#ref(vpc) }),
        );
        self.add(
            format!("{prefix}RouteTableAssociation"),
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({
                "RouteTableId": r#ref(&format!("{prefix}RouteTable")),
                "SubnetId": r#ref(&format!("{prefix}Subnet")),
            }),
        );
    }

    fn cluster(&mut self, id: &LogicalId) {
        self.add(id.to_string(), "AWS::ECS::Cluster", json!({}));
        self.output("ClusterName", r#ref(id.as_str()));
    }

    fn access_policy(&mut self, id: &LogicalId, p: &AccessPolicySpec) {
        let role = id.to_string();
        self.add(
            role.clone(),
            "AWS::IAM::Role",
            json!({ "AssumeRolePolicyDocument": assume_role(&p.principal) }),
        );

        let statements: Vec<Value> = p
            .statements
            .iter()
            .map(|st| {
                json!({
                    "Action": one_or_many(st.actions.clone()),
                    "Effect": st.effect.as_iam(),
                    "Resource": one_or_many(st.resources.iter().map(|a| a.to_string()).collect()),
                })
            })
            .collect();
        let policy = format!("{role}DefaultPolicy");
        self.add(
            policy.clone(),
            "AWS::IAM::Policy",
            json!({
                "PolicyDocument": { "Statement": statements, "Version": "2012-10-17" },
                "PolicyName": policy,
                "Roles": [r#ref(&role)],
            }),
        );
    }

    fn workload(&mut self, id: &LogicalId, w: &WorkloadSpec) {
        let task = id.to_string();
        let exec_role = format!("{task}ExecutionRole");

        self.add(
            exec_role.clone(),
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": assume_role(crate::model::TASK_PRINCIPAL),
                "ManagedPolicyArns": [
                    self.managed_policy("service-role/AmazonECSTaskExecutionRolePolicy"),
                ],
            }),
        );

        let environment: Vec<Value> = w
            .container
            .environment
            .iter()
            .map(|(k, v)| json!({ "Name": k, "Value": v }))
            .collect();

        let log_configuration = match &w.container.logging {
            LogDriver::AwsLogs { stream_prefix } => {
                let group = format!("{task}{}LogGroup", w.container.name);
                self.add_raw(
                    group.clone(),
                    json!({
                        "Type": "AWS::Logs::LogGroup",
                        "UpdateReplacePolicy": "Retain",
                        "DeletionPolicy": "Retain",
                    }),
                );
                self.output("LogGroupName", r#ref(&group));
                json!({
                    "LogDriver": "awslogs",
                    "Options": {
                        "awslogs-group": r#ref(&group),
                        "awslogs-region": self.ctx.region,
                        "awslogs-stream-prefix": stream_prefix,
                    },
                })
            }
        };

        self.add(
            task.clone(),
            "AWS::ECS::TaskDefinition",
            json!({
                "ContainerDefinitions": [{
                    "Environment": environment,
                    "Essential": true,
                    "Image": w.container.image.image_uri,
                    "LogConfiguration": log_configuration,
                    "Name": w.container.name,
                }],
                "Cpu": w.cpu.to_string(),
                "ExecutionRoleArn": get_att(&exec_role, "Arn"),
                "Memory": w.memory_mib.to_string(),
                "NetworkMode": "awsvpc",
                "RequiresCompatibilities": ["FARGATE"],
                "TaskRoleArn": get_att(w.task_role.as_str(), "Arn"),
            }),
        );
        self.output("ImageUri", Value::String(w.container.image.image_uri.clone()));
    }

    fn service(
        &mut self,
        id: &LogicalId,
        s: &ServiceSpec,
        network: (&LogicalId, &NetworkSpec),
        task_role: &LogicalId,
    ) {
        let svc = id.to_string();
        let sg = format!("{svc}SecurityGroup");
        let (vpc, n) = network;

        self.add(
            sg.clone(),
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": format!("{svc} tasks"),
                "SecurityGroupEgress": [{ "CidrIp": "0.0.0.0/0", "IpProtocol": "-1" }],
                "VpcId": r#ref(vpc.as_str()),
            }),
        );

        // Without NAT the tasks sit in public subnets and need their own address.
        let (kind, public_ip) = if n.nat.is_some() {
            ("Private", "DISABLED")
        } else {
            ("Public", "ENABLED")
        };
        let subnets: Vec<Value> = (1..=n.max_azs)
            .map(|az| r#ref(&format!("{vpc}{kind}Subnet{az}Subnet")))
            .collect();

        // The task role's policy and the outbound routes must exist before tasks start.
        let mut depends_on = vec![format!("{task_role}DefaultPolicy")];
        depends_on.extend(
            (1..=n.max_azs).map(|az| format!("{vpc}{kind}Subnet{az}DefaultRoute")),
        );

        self.add_raw(
            svc.clone(),
            json!({
                "Type": "AWS::ECS::Service",
                "Properties": {
                    "Cluster": r#ref(s.cluster.as_str()),
                    "DeploymentConfiguration": {
                        "MaximumPercent": 200,
                        "MinimumHealthyPercent": 50,
                    },
                    "DesiredCount": s.desired_count,
                    "EnableECSManagedTags": false,
                    "LaunchType": "FARGATE",
                    "NetworkConfiguration": {
                        "AwsvpcConfiguration": {
                            "AssignPublicIp": public_ip,
                            "SecurityGroups": [get_att(&sg, "GroupId")],
                            "Subnets": subnets,
                        },
                    },
                    "TaskDefinition": r#ref(s.task_definition.as_str()),
                },
                "DependsOn": depends_on,
            }),
        );
        self.output("ServiceName", get_att(&svc, "Name"));
    }
}
