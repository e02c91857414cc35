//! External command execution.
//!
//! Thin builder over [`std::process::Command`] that captures output and
//! turns a non-zero exit into an error carrying stderr.

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// Captured result of a finished command.
#[derive(Debug)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            envs: Vec::new(),
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Message used when the command exits non-zero.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Return the result instead of failing on a non-zero exit.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn run(self) -> Result<CommandResult> {
        let (status, stdout, stderr) = self.spawn()?;
        Ok(CommandResult {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr,
        })
    }

    /// Run and return raw stdout bytes, for commands that stream archives.
    pub fn run_bytes(self) -> Result<Vec<u8>> {
        let (_, stdout, _) = self.spawn()?;
        Ok(stdout)
    }

    fn spawn(self) -> Result<(ExitStatus, Vec<u8>, String)> {
        let shown = self.command_line();
        tracing::debug!(command = %shown, "running");

        let output = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawning '{shown}'"))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() && !self.allow_fail {
            let msg = self
                .error_msg
                .unwrap_or_else(|| format!("'{shown}' failed"));
            bail!("{msg} ({}): {stderr}", output.status);
        }

        Ok((output.status, output.stdout, stderr))
    }

    fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let result = Cmd::new("echo").arg("hello").run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[test]
    fn failure_carries_message() {
        let err = Cmd::new("sh")
            .args(["-c", "echo oops >&2; exit 3"])
            .error_msg("status check failed")
            .run()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("status check failed"));
        assert!(msg.contains("oops"));
    }

    #[test]
    fn default_failure_names_command_line() {
        let err = Cmd::new("sh").args(["-c", "exit 2"]).run().unwrap_err();
        assert!(err.to_string().contains("'sh -c exit 2' failed"));
    }

    #[test]
    fn missing_program_names_command_line() {
        let err = Cmd::new("definitely_not_a_real_command_12345")
            .arg("x")
            .run()
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("spawning 'definitely_not_a_real_command_12345 x'"));
    }

    #[test]
    fn allow_fail_returns_status() {
        let result = Cmd::new("sh").args(["-c", "exit 1"]).allow_fail().run().unwrap();
        assert!(!result.success());
    }

    #[test]
    fn env_is_passed() {
        let bytes = Cmd::new("sh")
            .args(["-c", "printf %s \"$PROBE\""])
            .env("PROBE", "value")
            .run_bytes()
            .unwrap();
        assert_eq!(bytes, b"value");
    }
}
