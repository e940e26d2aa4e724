//! Native-process plumbing shared by adapters: executable lookup, one-shot
//! command execution with captured output, and scratch-directory helpers.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Locate `name` on `PATH`, failing fast with [`Error::ExecutableNotFound`].
///
/// Adapters call this before attempting a spawn so a missing binary produces
/// one clear error instead of a confusing spawn failure mid-start.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        // Explicit path: no search, just verify.
        if is_executable(candidate) {
            return Ok(candidate.to_path_buf());
        }
        return Err(Error::ExecutableNotFound(name.to_string()));
    }

    let search_path = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&search_path) {
        let full = dir.join(name);
        if is_executable(&full) {
            return Ok(full);
        }
    }
    Err(Error::ExecutableNotFound(name.to_string()))
}

/// Verify that every named binary is on `PATH`.
pub fn check_executables(names: &[&str]) -> Result<()> {
    for name in names {
        find_executable(name)?;
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// A one-shot command run to completion with its output captured.
///
/// Built up in adapter start/stop code and executed with
/// [`run`](Exec::run); a non-zero exit surfaces the combined stdout/stderr
/// inside [`Error::ProcessStartFailed`] so test logs show what the service
/// actually printed.
#[derive(Debug, Default)]
pub struct Exec {
    program: String,
    args: Vec<String>,
    work_dir: Option<PathBuf>,
    env: HashMap<String, String>,
    stdin: Option<Vec<u8>>,
}

impl Exec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        self.args.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Spawn, feed stdin if any, and wait for exit.
    #[tracing::instrument(skip(self), fields(command = %self.program))]
    pub async fn run(self) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.work_dir {
            cmd.current_dir(dir);
        }
        // Overrides on top of the inherited environment, not a replacement.
        cmd.envs(&self.env);
        if self.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        let command_line = self.command_line();
        let mut child = cmd.spawn().map_err(|e| Error::ProcessStartFailed {
            command: command_line.clone(),
            reason: e.to_string(),
            output: String::new(),
        })?;

        if let Some(input) = self.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(&input)
                    .await
                    .map_err(|e| Error::ProcessStartFailed {
                        command: command_line.clone(),
                        reason: format!("failed to write stdin: {e}"),
                        output: String::new(),
                    })?;
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::ProcessStartFailed {
                command: command_line.clone(),
                reason: e.to_string(),
                output: String::new(),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        tracing::warn!(command = %command_line, status = ?output.status.code(), "process exited non-zero");
        Err(Error::ProcessStartFailed {
            command: command_line,
            reason: format!("exit status {:?}", output.status.code()),
            output: combined,
        })
    }

    fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Create a private per-instance scratch directory. Entirely adapter-owned;
/// dropping the returned handle removes the directory and everything in it.
pub fn scratch_dir(prefix: &str) -> Result<TempDir> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("{prefix}-"))
        .tempdir()?;
    Ok(dir)
}

/// Write a service config file into an adapter's scratch directory.
pub fn write_config(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, contents).map_err(|source| Error::ConfigWriteFailed {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_sh_on_path() {
        let path = find_executable("sh").unwrap();
        assert!(path.is_absolute());
    }

    #[test]
    fn missing_binary_fails_fast() {
        let err = check_executables(&["sh", "no-such-binary-stagehand"]).unwrap_err();
        assert!(matches!(
            err,
            Error::ExecutableNotFound(name) if name == "no-such-binary-stagehand"
        ));
    }

    #[tokio::test]
    async fn exec_success_is_silent() {
        Exec::new("sh").arg("-c").arg("exit 0").run().await.unwrap();
    }

    #[tokio::test]
    async fn exec_failure_carries_combined_output() {
        let err = Exec::new("sh")
            .arg("-c")
            .arg("echo out; echo err >&2; exit 3")
            .run()
            .await
            .unwrap_err();
        match err {
            Error::ProcessStartFailed { output, .. } => {
                assert!(output.contains("out"));
                assert!(output.contains("err"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn exec_honors_work_dir_env_and_stdin() {
        let dir = scratch_dir("exec-test").unwrap();
        // Canonicalized on both sides; tempdirs can sit behind a symlink.
        let real = dir.path().canonicalize().unwrap();
        Exec::new("sh")
            .arg("-c")
            .arg("test \"$(pwd -P)\" = \"$EXPECTED\" && cat > seen.txt")
            .work_dir(&real)
            .env("EXPECTED", real.display().to_string())
            .stdin("hello")
            .run()
            .await
            .unwrap();
        let seen = std::fs::read_to_string(dir.path().join("seen.txt")).unwrap();
        assert_eq!(seen, "hello");
    }

    #[test]
    fn write_config_lands_in_scratch_dir() {
        let dir = scratch_dir("cfg-test").unwrap();
        let path = write_config(dir.path(), "service.conf", "port 1234\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "port 1234\n");
    }

    #[test]
    fn write_config_into_missing_dir_reports_path() {
        let err =
            write_config(Path::new("/nonexistent-stagehand"), "a.conf", "x").unwrap_err();
        assert!(matches!(
            err,
            Error::ConfigWriteFailed { path, .. } if path.contains("nonexistent-stagehand")
        ));
    }
}
