//! External tool invocation (iptables, ipset).

use tokio::process::Command;
use tracing::trace;

use super::{NetworkError, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Exit code; `None` if killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a failed run into [`NetworkError::Command`].
    pub fn into_error(self, command: String) -> NetworkError {
        let message = if self.stderr.trim().is_empty() {
            format!("exit status {:?}", self.status)
        } else {
            self.stderr.trim().to_string()
        };
        NetworkError::Command {
            command,
            status: self.status,
            message,
        }
    }
}

/// Run `program args...` to completion.
///
/// Only a failure to spawn is an error here; callers decide what a non-zero
/// exit means.
pub async fn run(program: &str, args: &[&str]) -> Result<Output> {
    trace!(program, ?args, "exec");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| NetworkError::Command {
            command: render(program, args),
            status: None,
            message: e.to_string(),
        })?;

    Ok(Output {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run and require success, returning stdout.
pub async fn run_ok(program: &str, args: &[&str]) -> Result<String> {
    let output = run(program, args).await?;
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(output.into_error(render(program, args)))
    }
}

pub fn render(program: &str, args: &[&str]) -> String {
    let mut s = program.to_string();
    for arg in args {
        s.push(' ');
        s.push_str(arg);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_error_prefers_stderr() {
        let out = Output {
            status: Some(1),
            stdout: String::new(),
            stderr: "iptables: Bad rule\n".into(),
        };
        let err = out.into_error("iptables -t nat -D X".into());
        assert_eq!(err.to_string(), "iptables -t nat -D X: iptables: Bad rule");
    }

    #[test]
    fn test_into_error_without_stderr() {
        let out = Output {
            status: Some(2),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(
            out.into_error("ipset list".into()).to_string(),
            "ipset list: exit status Some(2)"
        );
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run("linkmesh-no-such-program", &["x"]).await.unwrap_err();
        assert!(matches!(err, NetworkError::Command { status: None, .. }));
    }
}
