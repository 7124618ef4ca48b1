//! Execution wrapper for invoking `gocryptfs`.
//!
//! All cryptographic volume management is delegated to the external engine;
//! this module only handles spawning it, feeding the passphrase over stdin,
//! and classifying its exit codes. Keeping the shell integration isolated
//! here keeps the higher-level logic testable with fake binaries.

use crate::error::{EmountError, ErrorCategory, ErrorKind, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Exit code with which gocryptfs signals a rejected passphrase.
const BAD_PASSPHRASE_EXIT_CODE: i32 = 12;

#[derive(Debug, Clone)]
pub struct GocryptfsCommand {
    binary: PathBuf,
}

#[derive(Debug)]
struct Output {
    stdout: String,
    stderr: String,
    status: i32,
}

impl Output {
    /// stderr if non-empty, else stdout; trimmed for display.
    fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        let text = if stderr.is_empty() { stdout } else { stderr };
        if text.is_empty() {
            "no additional output".to_string()
        } else {
            text.to_string()
        }
    }
}

impl Default for GocryptfsCommand {
    fn default() -> Self {
        Self::with_binary(PathBuf::from("gocryptfs"))
    }
}

impl GocryptfsCommand {
    /// Uses an explicit engine binary instead of PATH lookup of `gocryptfs`.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Initializes a new encrypted volume at `path`.
    ///
    /// The directory must already exist; gocryptfs writes its config file
    /// and encrypted tree root into it.
    pub fn init(&self, path: &Path, passphrase: &str) -> Result<()> {
        let path_arg = path.to_string_lossy();
        let out = self.run(&["-init", "-q", "--", &path_arg], passphrase)?;
        if out.status == 0 {
            return Ok(());
        }
        Err(EmountError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::EngineFailure,
            format!(
                "initialization failed: {} (rc={})",
                out.diagnostic(),
                out.status
            ),
        ))
    }

    /// Mounts the volume at `crypt_path` onto `mountpoint`.
    ///
    /// gocryptfs daemonizes once the mount is ready, so a zero exit status
    /// means the decrypted view is usable.
    pub fn mount(&self, crypt_path: &Path, mountpoint: &Path, passphrase: &str) -> Result<()> {
        let crypt_arg = crypt_path.to_string_lossy();
        let mount_arg = mountpoint.to_string_lossy();
        let out = self.run(&["-q", "--", &crypt_arg, &mount_arg], passphrase)?;
        match out.status {
            0 => Ok(()),
            BAD_PASSPHRASE_EXIT_CODE => Err(EmountError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidPassphrase,
                "invalid passphrase",
            )),
            status => Err(EmountError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::EngineFailure,
                format!("mount failed: {} (rc={})", out.diagnostic(), status),
            )),
        }
    }

    fn run(&self, args: &[&str], passphrase: &str) -> Result<Output> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        if let Some(mut stdin) = child.stdin.take() {
            // The engine may exit before reading stdin (e.g. bad arguments);
            // a broken pipe here must not mask the exit code we are about to
            // collect.
            let _ = stdin.write_all(passphrase.as_bytes());
        }

        let output = child.wait_with_output().map_err(|e| {
            EmountError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::EngineFailure,
                format!("failed waiting for {}", self.binary.display()),
                e,
            )
        })?;

        Ok(Output {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        })
    }

    fn spawn_error(&self, err: io::Error) -> EmountError {
        if err.kind() == io::ErrorKind::NotFound {
            return EmountError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::EngineFailure,
                format!(
                    "{} not found - install gocryptfs and ensure it is on PATH",
                    self.binary.display()
                ),
                err,
            );
        }
        EmountError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::EngineFailure,
            format!("failed to start {}", self.binary.display()),
            err,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Installs a fake gocryptfs shell script and returns a command bound
    /// to it. The fake accepts the passphrase "secret": `-init` writes a
    /// config file into the target directory, the mount form just exits 0.
    /// Any other passphrase yields exit code 22 for init and 12 for mount.
    #[cfg(unix)]
    fn fake_engine(dir: &TempDir) -> GocryptfsCommand {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.path().join("gocryptfs");
        fs::write(
            &script,
            concat!(
                "#!/bin/sh\n",
                "read -r pass\n",
                "if [ \"$1\" = \"-init\" ]; then\n",
                "  if [ \"$pass\" = \"secret\" ]; then\n",
                "    echo fake-config > \"$4/gocryptfs.conf\"\n",
                "    exit 0\n",
                "  fi\n",
                "  echo 'init rejected' >&2\n",
                "  exit 22\n",
                "fi\n",
                "if [ \"$pass\" = \"secret\" ]; then exit 0; fi\n",
                "echo 'Password incorrect.' >&2\n",
                "exit 12\n",
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        GocryptfsCommand::with_binary(script)
    }

    #[test]
    #[cfg(unix)]
    fn test_init_success_writes_config() {
        let dir = TempDir::new().unwrap();
        let vol = TempDir::new().unwrap();
        let engine = fake_engine(&dir);

        engine.init(vol.path(), "secret").unwrap();
        assert!(vol.path().join("gocryptfs.conf").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_init_failure_reports_diagnostic_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let vol = TempDir::new().unwrap();
        let engine = fake_engine(&dir);

        let err = engine.init(vol.path(), "wrong").unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::EngineFailure));
        assert!(err.to_string().contains("init rejected"), "{}", err);
        assert!(err.to_string().contains("rc=22"), "{}", err);
    }

    #[test]
    #[cfg(unix)]
    fn test_mount_wrong_passphrase_maps_exit_12() {
        let dir = TempDir::new().unwrap();
        let vol = TempDir::new().unwrap();
        let mp = TempDir::new().unwrap();
        let engine = fake_engine(&dir);

        let err = engine.mount(vol.path(), mp.path(), "wrong").unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::InvalidPassphrase));
        assert_eq!(err.category, ErrorCategory::User);
    }

    #[test]
    #[cfg(unix)]
    fn test_mount_success() {
        let dir = TempDir::new().unwrap();
        let vol = TempDir::new().unwrap();
        let mp = TempDir::new().unwrap();
        let engine = fake_engine(&dir);

        engine.mount(vol.path(), mp.path(), "secret").unwrap();
    }

    #[test]
    fn test_missing_binary_is_reported() {
        let engine = GocryptfsCommand::with_binary(PathBuf::from(
            "/nonexistent/definitely-not-gocryptfs",
        ));
        let err = engine
            .init(Path::new("/tmp/unused"), "secret")
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::EngineFailure));
        assert!(err.to_string().contains("not found"), "{}", err);
    }
}
