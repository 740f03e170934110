use crate::error::ProvisioningError;
use std::io::Write;
use std::process::{Command, Stdio};

/// Runs an external program and returns its stdout.
pub trait CommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<String, ProvisioningError>;
}

/// Runs commands on the local machine.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<String, ProvisioningError> {
        let command = format!("{} {}", program, args.join(" "));
        tracing::debug!(%command, "running");

        let spawn_err = |source: std::io::Error| ProvisioningError::Spawn {
            command: command.clone(),
            source,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).map_err(spawn_err)?;
        }

        let output = child.wait_with_output().map_err(spawn_err)?;
        if !output.status.success() {
            return Err(ProvisioningError::Failed {
                command,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = SystemRunner
            .run("chatbot-stack-no-such-program", &[], None)
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn stdin_is_forwarded_and_stdout_captured() {
        let out = SystemRunner.run("cat", &[], Some("hello")).unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_keeps_stderr() {
        let args = vec!["-c".to_string(), "echo nope >&2; exit 3".to_string()];
        let err = SystemRunner.run("sh", &args, None).unwrap_err();
        match err {
            ProvisioningError::Failed { status, stderr, .. } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "nope\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
