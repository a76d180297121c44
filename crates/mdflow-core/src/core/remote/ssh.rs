use super::{CommandOutput, RemoteError, RemoteShell, path_str};
use std::path::Path;
use std::process::Command;
use tracing::{debug, trace};

/// Remote shell backed by the system OpenSSH client and an already running agent.
#[derive(Debug, Clone)]
pub struct SshConnection {
    address: String,
    ssh: String,
    scp: String,
}

impl SshConnection {
    /// Verifies the SSH agent and returns a connection to `address`.
    ///
    /// No session is opened here; every command runs its own `ssh` process, which
    /// authenticates through the agent.
    pub fn connect(address: &str, ssh: &str, scp: &str) -> Result<Self, RemoteError> {
        check_agent()?;
        debug!("Using SSH agent for {}", address);
        Ok(Self {
            address: address.to_string(),
            ssh: ssh.to_string(),
            scp: scp.to_string(),
        })
    }
}

fn check_agent() -> Result<(), RemoteError> {
    let socket = std::env::var_os("SSH_AUTH_SOCK")
        .ok_or_else(|| RemoteError::AgentUnavailable("SSH_AUTH_SOCK is not set".to_string()))?;
    if !Path::new(&socket).exists() {
        return Err(RemoteError::AgentUnavailable(format!(
            "agent socket {:?} does not exist",
            socket
        )));
    }
    let listed = execute("ssh-add", &["-L".to_string()])?;
    if !listed.success() {
        return Err(RemoteError::AgentUnavailable(format!(
            "ssh-add -L exited with {}: {}",
            listed.code,
            listed.stderr.trim()
        )));
    }
    Ok(())
}

fn execute(program: &str, args: &[String]) -> Result<CommandOutput, RemoteError> {
    let command = std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    trace!("Running command: {}", command);

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| RemoteError::Spawn {
            program: program.to_string(),
            source,
        })?;

    Ok(CommandOutput {
        command,
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

impl RemoteShell for SshConnection {
    fn address(&self) -> &str {
        &self.address
    }

    fn run_remote(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        execute(&self.ssh, &[self.address.clone(), command.to_string()])
    }

    fn run_local(&self, program: &str, args: &[String]) -> Result<CommandOutput, RemoteError> {
        execute(program, args)
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<CommandOutput, RemoteError> {
        let target = format!("{}:{}", self.address, remote);
        execute(
            &self.scp,
            &["-r".to_string(), path_str(local)?.to_string(), target],
        )
    }

    fn download(&self, remote: &str, local: &Path) -> Result<CommandOutput, RemoteError> {
        let source = format!("{}:{}", self.address, remote);
        execute(
            &self.scp,
            &["-r".to_string(), source, path_str(local)?.to_string()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_captures_exit_code_and_output() {
        let output = execute("sh", &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()])
            .unwrap();

        assert_eq!(output.code, 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.success());
        assert!(output.command.starts_with("sh -c"));
    }

    #[test]
    fn execute_reports_missing_programs() {
        let err = execute("mdflow-no-such-program", &[]).unwrap_err();
        assert!(matches!(err, RemoteError::Spawn { .. }));
    }
}
