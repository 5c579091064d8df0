//! Executor boundary: the object through which operations touch the system.
//!
//! Operations never run commands or write files directly; they go through an
//! [`Executor`] so that dry-run behavior, change reporting and (eventually)
//! remote transports live in one place. Only the local executor is
//! implemented; `agent` and `server` connections fail fast in
//! [`executor_for`] until a remote transport exists.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Error, Result};
use crate::plan::{Connection, Host};

/// Captured outcome of one external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// The command line that ran (or would have run).
    pub command: Vec<String>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code; -1 when terminated by a signal.
    pub code: i32,
}

impl CommandOutput {
    /// True when the command exited zero.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Per-invocation options for [`Executor::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Raise [`Error::CommandFailed`] on nonzero exit.
    pub check: bool,
    /// Whether the command mutates the host. Mutating commands are skipped
    /// in dry-run mode; probes (readonly) still run.
    pub mutating: bool,
    /// Extra environment variables layered over the inherited environment.
    pub env: Option<HashMap<String, String>>,
    /// Working directory override.
    pub cwd: Option<PathBuf>,
    /// Bounded execution time; expiry kills the process.
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            check: true,
            mutating: true,
            env: None,
            cwd: None,
            timeout: None,
        }
    }
}

impl RunOptions {
    /// Options for a read-only probe: never skipped by dry-run, nonzero exit
    /// is an answer rather than an error.
    pub fn probe() -> Self {
        Self {
            check: false,
            mutating: false,
            ..Default::default()
        }
    }

    /// Disables check-on-nonzero-exit.
    pub fn no_check(mut self) -> Self {
        self.check = false;
        self
    }

    /// Sets extra environment variables.
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Sets the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a mutating file primitive: whether anything changed and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub changed: bool,
    pub detail: String,
}

impl Change {
    /// A change with the given reason.
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            changed: true,
            detail: detail.into(),
        }
    }

    /// Nothing to do.
    pub fn noop() -> Self {
        Self {
            changed: false,
            detail: "noop".to_string(),
        }
    }

    fn from_reasons(reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            Self::noop()
        } else {
            Self::new(reasons.join(", "))
        }
    }
}

/// The boundary through which operations perform system side effects.
///
/// All mutating primitives honor dry-run mode: they compute and report the
/// would-be change without applying it.
pub trait Executor {
    /// Whether this executor is in dry-run mode.
    fn dry_run(&self) -> bool;

    /// Runs an external command.
    fn run(&self, command: &[String], options: &RunOptions) -> Result<CommandOutput>;

    /// Reads a text file; an absent file is `Ok(None)`, not an error.
    fn read_file(&self, path: &Path) -> Result<Option<String>>;

    /// Ensures a file holds `content` with the given permission bits.
    fn write_file(&self, path: &Path, content: &str, mode: Option<u32>) -> Result<Change>;

    /// Ensures a directory exists with the given permission bits.
    fn ensure_directory(&self, path: &Path, mode: Option<u32>) -> Result<Change>;

    /// Removes a file or directory tree, reporting whether anything was
    /// actually removed.
    fn remove_path(&self, path: &Path) -> Result<bool>;

    /// Sets ownership on a path.
    fn set_ownership(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<Change>;
}

/// Maps a host's connection mode to an executor.
///
/// `agent` and `server` are recognized placeholders for future remote
/// execution and fail the run immediately.
pub fn executor_for(host: &Host, dry_run: bool) -> Result<Box<dyn Executor>> {
    match host.connection {
        Connection::Local => Ok(Box::new(LocalExecutor::new(dry_run))),
        Connection::Agent => Err(Error::UnsupportedConnection {
            host: host.name.clone(),
            connection: "agent".to_string(),
            message: "agent connection requested but no agent executor is available yet"
                .to_string(),
        }),
        Connection::Server => Err(Error::UnsupportedConnection {
            host: host.name.clone(),
            connection: "server".to_string(),
            message: "server mediated orchestration will be added in a future revision"
                .to_string(),
        }),
    }
}

/// Executor acting directly on the machine running the engine.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    dry_run: bool,
}

impl LocalExecutor {
    /// Creates a local executor, optionally in dry-run mode.
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    fn file_mode(path: &Path) -> Option<u32> {
        fs::metadata(path)
            .ok()
            .map(|m| m.permissions().mode() & 0o7777)
    }

    fn apply_mode(
        &self,
        path: &Path,
        mode: Option<u32>,
        reasons: &mut Vec<String>,
    ) -> Result<()> {
        let Some(mode) = mode else {
            return Ok(());
        };
        if Self::file_mode(path) != Some(mode) {
            reasons.push(format!("mode->{mode:04o}"));
            // chmod fails on an absent path, which happens in dry-run when
            // the creation itself was skipped.
            if !self.dry_run && path.exists() {
                fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
            }
        }
        Ok(())
    }

    fn wait_with_timeout(
        child: &mut std::process::Child,
        command: &[String],
        timeout: Duration,
    ) -> Result<std::process::ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::CommandTimeout {
                    command: command.join(" "),
                    timeout_secs: timeout.as_secs(),
                });
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Executor for LocalExecutor {
    fn dry_run(&self) -> bool {
        self.dry_run
    }

    fn run(&self, command: &[String], options: &RunOptions) -> Result<CommandOutput> {
        if command.is_empty() {
            return Err(Error::operation_execution("exec", "empty command"));
        }
        if self.dry_run && options.mutating {
            debug!(command = %command.join(" "), "skipping mutating command (dry-run)");
            return Ok(CommandOutput {
                command: command.to_vec(),
                stdout: String::new(),
                stderr: "skipped (dry-run)".to_string(),
                code: 0,
            });
        }

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(env) = &options.env {
            cmd.envs(env);
        }
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        debug!(command = %command.join(" "), "running command");
        let mut child = cmd.spawn()?;
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf);
            }
            buf
        });
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf);
            }
            buf
        });

        let status = match options.timeout {
            Some(timeout) => Self::wait_with_timeout(&mut child, command, timeout)?,
            None => child.wait()?,
        };
        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();
        let code = status.code().unwrap_or(-1);

        if options.check && code != 0 {
            return Err(Error::CommandFailed {
                command: command.join(" "),
                code,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(CommandOutput {
            command: command.to_vec(),
            stdout,
            stderr,
            code,
        })
    }

    fn read_file(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, path: &Path, content: &str, mode: Option<u32>) -> Result<Change> {
        let mut reasons = Vec::new();
        let current = self.read_file(path)?;
        if current.as_deref() != Some(content) {
            reasons.push("content".to_string());
            if !self.dry_run {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, content)?;
            }
        }
        self.apply_mode(path, mode, &mut reasons)?;
        Ok(Change::from_reasons(reasons))
    }

    fn ensure_directory(&self, path: &Path, mode: Option<u32>) -> Result<Change> {
        let mut reasons = Vec::new();
        if !path.exists() {
            reasons.push("created".to_string());
            if !self.dry_run {
                fs::create_dir_all(path)?;
            }
        } else if !path.is_dir() {
            reasons.push("replaced-non-dir".to_string());
            if !self.dry_run {
                self.remove_path(path)?;
                fs::create_dir_all(path)?;
            }
        }
        self.apply_mode(path, mode, &mut reasons)?;
        Ok(Change::from_reasons(reasons))
    }

    fn remove_path(&self, path: &Path) -> Result<bool> {
        if !path.exists() && !path.is_symlink() {
            return Ok(false);
        }
        if self.dry_run {
            return Ok(true);
        }
        if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(true)
    }

    fn set_ownership(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<Change> {
        use std::os::unix::fs::MetadataExt;

        if uid.is_none() && gid.is_none() {
            return Ok(Change::noop());
        }
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            // The path may legitimately be absent in dry-run mode when its
            // creation was itself skipped.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.dry_run => {
                return Ok(Change::new("owner"));
            }
            Err(e) => return Err(e.into()),
        };
        let new_uid = uid.unwrap_or(meta.uid());
        let new_gid = gid.unwrap_or(meta.gid());
        if meta.uid() == new_uid && meta.gid() == new_gid {
            return Ok(Change::noop());
        }
        if !self.dry_run {
            std::os::unix::fs::chown(path, Some(new_uid), Some(new_gid))?;
        }
        Ok(Change::new(format!("owner->{new_uid}:{new_gid}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_output() {
        let executor = LocalExecutor::new(false);
        let out = executor
            .run(
                &["echo".to_string(), "hello".to_string()],
                &RunOptions::default(),
            )
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.success());
    }

    #[test]
    fn run_check_raises_on_nonzero() {
        let executor = LocalExecutor::new(false);
        let err = executor
            .run(&["false".to_string()], &RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { code: 1, .. }));

        let out = executor
            .run(&["false".to_string()], &RunOptions::probe())
            .unwrap();
        assert_eq!(out.code, 1);
    }

    #[test]
    fn dry_run_skips_mutating_commands_only() {
        let executor = LocalExecutor::new(true);
        let out = executor
            .run(&["false".to_string()], &RunOptions::default().no_check())
            .unwrap();
        assert_eq!(out.stderr, "skipped (dry-run)");

        // Probes still run in dry-run mode.
        let out = executor
            .run(&["echo".to_string(), "probe".to_string()], &RunOptions::probe())
            .unwrap();
        assert_eq!(out.stdout.trim(), "probe");
    }

    #[test]
    fn write_file_reports_reasons_and_settles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("f.txt");
        let executor = LocalExecutor::new(false);

        let change = executor.write_file(&path, "hi", Some(0o640)).unwrap();
        assert!(change.changed);
        assert!(change.detail.contains("content"));
        assert!(change.detail.contains("mode->0640"));

        let change = executor.write_file(&path, "hi", Some(0o640)).unwrap();
        assert_eq!(change, Change::noop());
    }

    #[test]
    fn dry_run_write_reports_without_touching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let executor = LocalExecutor::new(true);

        let change = executor.write_file(&path, "hi", None).unwrap();
        assert!(change.changed);
        assert!(!path.exists());
    }

    #[test]
    fn remove_path_reports_whether_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let executor = LocalExecutor::new(false);
        assert!(!executor.remove_path(&path).unwrap());
        std::fs::write(&path, "x").unwrap();
        assert!(executor.remove_path(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn command_timeout_kills_process() {
        let executor = LocalExecutor::new(false);
        let err = executor
            .run(
                &["sleep".to_string(), "5".to_string()],
                &RunOptions::default().timeout(Duration::from_millis(50)),
            )
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));
    }

    #[test]
    fn unimplemented_connections_fail_fast() {
        let mut host = Host::new("edge1");
        host.connection = Connection::Agent;
        assert!(matches!(
            executor_for(&host, false),
            Err(Error::UnsupportedConnection { .. })
        ));
    }
}
