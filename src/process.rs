//! External command execution.
//!
//! Every pipeline side effect goes through a [`CommandRunner`]. Commands are a
//! program plus a literal argument vector; nothing is interpreted by a shell
//! unless [`Cmd::shell`] is used explicitly, in which case dynamic values are
//! passed as positional parameters rather than spliced into the script.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{InstallError, Result};

/// Result of a command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    /// `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Builder for one external program invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    /// If true, a non-zero exit is returned as a result instead of an error.
    allow_fail: bool,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
            allow_fail: false,
        }
    }

    /// `sh -c <script> sh <params...>`.
    ///
    /// Inside `script`, refer to the parameters as `"$1"`, `"$2"`, ...
    pub fn shell<I, S>(script: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Cmd::new("sh").args(["-c", script, "sh"]).args(params)
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Feed bytes to the child's stdin. Never logged.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Kill the child and fail with [`InstallError::Timeout`] after `limit`.
    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Prefix this command with another program, e.g. a chroot wrapper.
    pub fn wrapped_in(self, program: &str, leading: &[String]) -> Self {
        let mut args = leading.to_vec();
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: program.to_string(),
            args,
            ..self
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn stdin_bytes(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Map a finished run to success or [`InstallError::ExecutionFailed`].
    pub fn check(&self, result: CommandResult) -> Result<CommandResult> {
        if self.allow_fail || result.success() {
            return Ok(result);
        }
        Err(InstallError::ExecutionFailed {
            program: self.program.clone(),
            args: self.args.clone(),
            exit_code: result.exit_code,
            stderr: result.stderr,
        })
    }

    fn launch_error(&self, err: &std::io::Error) -> InstallError {
        InstallError::ExecutionFailed {
            program: self.program.clone(),
            args: self.args.clone(),
            exit_code: None,
            stderr: format!("failed to execute '{}': {}. Is it installed?", self.program, err),
        }
    }

    fn timeout_error(&self, after: Duration) -> InstallError {
        InstallError::Timeout {
            program: self.program.clone(),
            args: self.args.clone(),
            after,
        }
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmd")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("allow_fail", &self.allow_fail)
            .finish()
    }
}

/// Something that can execute a [`Cmd`].
pub trait CommandRunner {
    /// Spawn the command and collect its output.
    ///
    /// Only launch failures and timeouts are errors here; exit status is
    /// interpreted by [`CommandRunner::run`].
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult>;

    /// Run the command, failing on non-zero exit unless `allow_fail` is set.
    fn run(&self, cmd: &Cmd) -> Result<CommandResult> {
        debug!(command = %cmd, "running");
        let result = self.execute(cmd)?;
        cmd.check(result)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult> {
        (**self).execute(cmd)
    }
}

/// Runs commands on the host.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    async fn execute_async(cmd: &Cmd) -> Result<CommandResult> {
        let mut command = tokio::process::Command::new(cmd.program());
        command
            .args(cmd.get_args())
            .stdin(if cmd.stdin_bytes().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| cmd.launch_error(&e))?;

        if let (Some(input), Some(mut stdin)) = (cmd.stdin_bytes(), child.stdin.take()) {
            stdin
                .write_all(input)
                .await
                .map_err(|e| cmd.launch_error(&e))?;
            // Dropping closes the pipe so the child sees EOF.
            drop(stdin);
        }

        let output = child.wait_with_output();
        let output = match cmd.get_timeout() {
            Some(limit) => tokio::time::timeout(limit, output)
                .await
                .map_err(|_| cmd.timeout_error(limit))?,
            None => output.await,
        }
        .map_err(|e| cmd.launch_error(&e))?;

        Ok(CommandResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl CommandRunner for SystemRunner {
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| cmd.launch_error(&e))?;
        runtime.block_on(Self::execute_async(cmd))
    }
}

/// Quote a value for inclusion in a POSIX shell script.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Check if a program exists in PATH.
pub fn which(program: &str) -> Option<String> {
    which::which(program)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let result = SystemRunner.run(&Cmd::new("echo").arg("hello")).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_run_failure_is_execution_failed() {
        let err = SystemRunner
            .run(&Cmd::new("ls").arg("/nonexistent_path_12345"))
            .unwrap_err();
        match err {
            InstallError::ExecutionFailed {
                program,
                args,
                exit_code,
                stderr,
            } => {
                assert_eq!(program, "ls");
                assert_eq!(args, vec!["/nonexistent_path_12345"]);
                assert_ne!(exit_code, Some(0));
                assert!(!stderr.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program_is_execution_failed() {
        let err = SystemRunner
            .run(&Cmd::new("nonexistent_program_12345"))
            .unwrap_err();
        assert!(matches!(
            err,
            InstallError::ExecutionFailed { exit_code: None, .. }
        ));
    }

    #[test]
    fn test_allow_fail() {
        let result = SystemRunner.run(&Cmd::new("false").allow_fail()).unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, Some(1));
    }

    #[test]
    fn test_stdin_is_fed() {
        let result = SystemRunner
            .run(&Cmd::new("cat").stdin("secret-passphrase"))
            .unwrap();
        assert_eq!(result.stdout, "secret-passphrase");
    }

    #[test]
    fn test_timeout() {
        let err = SystemRunner
            .run(&Cmd::new("sleep").arg("5").timeout(Some(Duration::from_millis(100))))
            .unwrap_err();
        assert!(matches!(err, InstallError::Timeout { .. }));
    }

    #[test]
    fn test_shell_params_are_not_interpolated() {
        let hostile = "x; echo pwned";
        let result = SystemRunner
            .run(&Cmd::shell(r#"printf '%s' "$1""#, [hostile]))
            .unwrap();
        assert_eq!(result.stdout, hostile);
    }

    #[test]
    fn test_wrapped_in_prefixes_program() {
        let cmd = Cmd::new("locale-gen").wrapped_in("arch-chroot", &["/mnt".to_string()]);
        assert_eq!(cmd.program(), "arch-chroot");
        assert_eq!(cmd.get_args(), ["/mnt", "locale-gen"]);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/dev/sda"), "/dev/sda");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_debug_redacts_stdin() {
        let cmd = Cmd::new("cryptsetup").stdin("hunter2");
        assert!(!format!("{cmd:?}").contains("hunter2"));
    }

    #[test]
    fn test_which_exists() {
        assert!(which("sh").is_some());
        assert!(which("nonexistent_program_12345").is_none());
    }
}
