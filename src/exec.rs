//! Locating and running the user command.
//!
//! The command inherits stdin/stdout/stderr, so piping in or out works and
//! running an interactive shell gives a usable terminal. The caller's full
//! environment (PATH, DISPLAY, ...) is inherited too, augmented with the
//! entries the caller supplies.

use crate::error::{EmountError, ErrorCategory, ErrorKind, Result};
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Resolves `program` to an executable path.
///
/// A name containing a path separator is validated in place; a bare name is
/// looked up on PATH. Resolution happens before the volume is mounted so a
/// typo does not leave a mount behind.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        if is_executable_file(&path) {
            return Ok(path);
        }
        return Err(EmountError::with_kind(
            ErrorCategory::User,
            ErrorKind::CommandNotFound,
            format!("program {} not found or not executable", program),
        ));
    }

    if let Some(paths) = env::var_os("PATH") {
        for dir in env::split_paths(&paths) {
            let candidate = dir.join(program);
            if is_executable_file(&candidate) {
                return Ok(candidate);
            }
        }
    }

    Err(EmountError::with_kind(
        ErrorCategory::User,
        ErrorKind::CommandNotFound,
        format!("program {} not found on PATH", program),
    ))
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Runs the command and waits for it to complete.
pub fn run_command(program: &Path, args: &[String], extra_env: &[(&str, &OsStr)]) -> Result<()> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    for (key, value) in extra_env {
        cmd.env(key, value);
    }

    let status = cmd.status().map_err(|e| {
        EmountError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::CommandFailed,
            format!("failed to start {}", program.display()),
            e,
        )
    })?;

    if status.success() {
        return Ok(());
    }
    let msg = match status.code() {
        Some(code) => format!("command exited with error (rc={})", code),
        None => "command terminated by signal".to_string(),
    };
    Err(EmountError::with_kind(
        ErrorCategory::User,
        ErrorKind::CommandFailed,
        msg,
    ))
}
