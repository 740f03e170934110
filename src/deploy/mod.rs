//! Hand a rendered declaration to the external provisioning tools.
//!
//! The tools are driven through `CommandRunner` so the sequence can be checked
//! without docker or the AWS CLI installed. Failures come back as
//! `ProvisioningError` with the tool's stderr untouched; nothing is retried.

pub mod runner;

pub use runner::{CommandRunner, SystemRunner};

use crate::error::ProvisioningError;
use crate::model::DesiredState;
use crate::model::asset::registry_host;
use crate::spec::{CloudContext, ContainerAsset, ResourceSpec};
use std::path::Path;

/// ECR error code for a repository that does not exist yet.
const REPOSITORY_NOT_FOUND: &str = "RepositoryNotFoundException";

pub trait Provisioner {
    /// Build and push the image, then create or update the stack from `template`.
    fn deploy(&self, state: &DesiredState, template: &Path) -> Result<(), ProvisioningError>;

    /// Delete the stack and wait for the deletion to finish.
    fn destroy(&self, stack_name: &str, region: &str) -> Result<(), ProvisioningError>;
}

/// `docker` + `aws` CLI backed provisioner.
pub struct AwsCliProvisioner<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> AwsCliProvisioner<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn aws(&self, region: &str, args: &[&str]) -> Result<String, ProvisioningError> {
        let mut full: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        full.push("--region".to_string());
        full.push(region.to_string());
        self.runner.run("aws", &full, None)
    }

    fn docker(&self, args: &[&str], stdin: Option<&str>) -> Result<String, ProvisioningError> {
        let full: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.run("docker", &full, stdin)
    }

    fn ensure_repository(
        &self,
        ctx: &CloudContext,
        repository: &str,
    ) -> Result<(), ProvisioningError> {
        let found = self.aws(
            &ctx.region,
            &["ecr", "describe-repositories", "--repository-names", repository],
        );
        match found {
            Ok(_) => Ok(()),
            Err(ProvisioningError::Failed { stderr, .. })
                if stderr.contains(REPOSITORY_NOT_FOUND) =>
            {
                tracing::info!(%repository, "creating ECR repository");
                self.aws(
                    &ctx.region,
                    &["ecr", "create-repository", "--repository-name", repository],
                )?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn push_image(
        &self,
        ctx: &CloudContext,
        image: &ContainerAsset,
    ) -> Result<(), ProvisioningError> {
        self.ensure_repository(ctx, &image.repository)?;

        let password = self.aws(&ctx.region, &["ecr", "get-login-password"])?;
        let host = registry_host(&image.image_uri);
        self.docker(
            &["login", "--username", "AWS", "--password-stdin", host],
            Some(password.trim_end()),
        )?;

        let context = image.context.to_string_lossy();
        tracing::info!(image = %image.image_uri, context = %context, "building image");
        self.docker(&["build", "--tag", &image.image_uri, &context], None)?;
        self.docker(&["push", &image.image_uri], None)?;
        Ok(())
    }
}

impl<R: CommandRunner> Provisioner for AwsCliProvisioner<R> {
    fn deploy(&self, state: &DesiredState, template: &Path) -> Result<(), ProvisioningError> {
        let ctx = &state.context;

        for (_, spec) in state.graph.iter_ordered() {
            if let ResourceSpec::Workload(w) = spec {
                self.push_image(ctx, &w.container.image)?;
            }
        }

        let template = template.to_string_lossy();
        tracing::info!(stack = %state.stack_name, template = %template, "deploying stack");
        self.aws(
            &ctx.region,
            &[
                "cloudformation",
                "deploy",
                "--template-file",
                &template,
                "--stack-name",
                &state.stack_name,
                "--capabilities",
                "CAPABILITY_IAM",
                "--no-fail-on-empty-changeset",
            ],
        )?;
        tracing::info!(stack = %state.stack_name, "stack deployed");
        Ok(())
    }

    fn destroy(&self, stack_name: &str, region: &str) -> Result<(), ProvisioningError> {
        tracing::info!(stack = %stack_name, %region, "deleting stack");
        self.aws(region, &["cloudformation", "delete-stack", "--stack-name", stack_name])?;
        self.aws(
            region,
            &["cloudformation", "wait", "stack-delete-complete", "--stack-name", stack_name],
        )?;
        tracing::info!(stack = %stack_name, "stack deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::model::build_desired_state;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::fs;

    /// Records every invocation; fails those whose command line starts with `fail_on`.
    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
        stdin: RefCell<Vec<String>>,
        fail_on: Vec<&'static str>,
        fail_stderr: Option<&'static str>,
    }

    impl CommandRunner for Recorder {
        fn run(
            &self,
            program: &str,
            args: &[String],
            stdin: Option<&str>,
        ) -> Result<String, ProvisioningError> {
            let line = format!("{} {}", program, args.join(" "));
            self.calls.borrow_mut().push(line.clone());
            if let Some(input) = stdin {
                self.stdin.borrow_mut().push(input.to_string());
            }
            if self.fail_on.iter().any(|p| line.starts_with(p)) {
                return Err(ProvisioningError::Failed {
                    command: line,
                    status: Some(254),
                    stderr: self
                        .fail_stderr
                        .unwrap_or("An error occurred (Boom) when calling the Op operation")
                        .to_string(),
                });
            }
            Ok(if line.contains("get-login-password") {
                "s3cret\n".to_string()
            } else {
                String::new()
            })
        }
    }

    fn state(dir: &Path) -> DesiredState {
        let context = dir.join("chatbot");
        fs::create_dir_all(&context).unwrap();
        fs::write(context.join("Dockerfile"), "FROM scratch\n").unwrap();
        let text = dir.join("character.txt");
        fs::write(&text, "hi").unwrap();

        let mut config = StackConfig::default();
        config.workload.build_context = context;
        config.workload.character_setting = text;
        let ctx = CloudContext::new("123456789012", "us-east-1").unwrap();
        build_desired_state(&ctx, &config).unwrap()
    }

    fn image_uri(state: &DesiredState) -> String {
        match state.graph.find_kind("workload") {
            Some((_, ResourceSpec::Workload(w))) => w.container.image.image_uri.clone(),
            _ => panic!("no workload"),
        }
    }

    #[test]
    fn deploy_pushes_image_then_deploys_stack() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let uri = image_uri(&state);
        let prov = AwsCliProvisioner::new(Recorder::default());

        prov.deploy(&state, Path::new("out/stack.template.json")).unwrap();

        let calls = prov.runner.calls.borrow();
        assert_eq!(
            *calls,
            vec![
                "aws ecr describe-repositories --repository-names openai-discord-bot --region us-east-1".to_string(),
                "aws ecr get-login-password --region us-east-1".to_string(),
                "docker login --username AWS --password-stdin 123456789012.dkr.ecr.us-east-1.amazonaws.com".to_string(),
                format!("docker build --tag {} {}", uri, dir.path().join("chatbot").display()),
                format!("docker push {}", uri),
                "aws cloudformation deploy --template-file out/stack.template.json --stack-name OpenaiDiscordBotStack --capabilities CAPABILITY_IAM --no-fail-on-empty-changeset --region us-east-1".to_string(),
            ]
        );
        assert_eq!(*prov.runner.stdin.borrow(), vec!["s3cret".to_string()]);
    }

    #[test]
    fn missing_repository_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let prov = AwsCliProvisioner::new(Recorder {
            fail_on: vec!["aws ecr describe-repositories"],
            fail_stderr: Some(
                "An error occurred (RepositoryNotFoundException) when calling the \
                 DescribeRepositories operation: The repository with name \
                 'openai-discord-bot' does not exist",
            ),
            ..Default::default()
        });

        prov.deploy(&state, Path::new("t.json")).unwrap();
        let calls = prov.runner.calls.borrow();
        assert_eq!(
            calls[1],
            "aws ecr create-repository --repository-name openai-discord-bot --region us-east-1"
        );
    }

    #[test]
    fn repository_lookup_denied_is_not_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let denied = "An error occurred (AccessDeniedException) when calling the \
                      DescribeRepositories operation: not authorized";
        let prov = AwsCliProvisioner::new(Recorder {
            fail_on: vec!["aws ecr describe-repositories"],
            fail_stderr: Some(denied),
            ..Default::default()
        });

        let err = prov.deploy(&state, Path::new("t.json")).unwrap_err();
        match err {
            ProvisioningError::Failed { command, stderr, .. } => {
                assert!(command.starts_with("aws ecr describe-repositories"));
                assert_eq!(stderr, denied);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(prov.runner.calls.borrow().len(), 1);
    }

    #[test]
    fn engine_failure_is_passed_through_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let prov = AwsCliProvisioner::new(Recorder {
            fail_on: vec!["aws cloudformation deploy"],
            ..Default::default()
        });

        let err = prov.deploy(&state, Path::new("t.json")).unwrap_err();
        match err {
            ProvisioningError::Failed { status, stderr, .. } => {
                assert_eq!(status, Some(254));
                assert_eq!(stderr, "An error occurred (Boom) when calling the Op operation");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failed_build_stops_before_stack_deploy() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let prov = AwsCliProvisioner::new(Recorder {
            fail_on: vec!["docker build"],
            ..Default::default()
        });

        assert!(prov.deploy(&state, Path::new("t.json")).is_err());
        let calls = prov.runner.calls.borrow();
        assert!(!calls.iter().any(|c| c.starts_with("aws cloudformation")));
    }

    #[test]
    fn destroy_deletes_and_waits() {
        let prov = AwsCliProvisioner::new(Recorder::default());
        prov.destroy("BotStack", "eu-central-1").unwrap();
        assert_eq!(
            *prov.runner.calls.borrow(),
            vec![
                "aws cloudformation delete-stack --stack-name BotStack --region eu-central-1",
                "aws cloudformation wait stack-delete-complete --stack-name BotStack --region eu-central-1",
            ]
        );
    }
}
