//! High-level volume operations
//!
//! This module composes the engine wrapper, the passphrase readers, the
//! command runner and the unmounter into the two user-visible operations:
//! initializing a volume (optionally seeded from an existing folder) and
//! running a command against a mounted volume.

use crate::engine::GocryptfsCommand;
use crate::error::{EmountError, ErrorCategory, ErrorKind, Result};
use crate::exec;
use crate::passphrase::PassphraseReader;
use crate::unmount;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zeroize::Zeroizing;

/// Environment variable through which the command receives the mountpoint.
pub const ENV_FOLDER_KEY: &str = "EMOUNT_FOLDER";

/// Prefix for dynamically created temporary mountpoints.
const MOUNTPOINT_PREFIX: &str = "emount_";

/// Permissions for directories we create (volume folders and mountpoints).
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    /// No filesystem entry at the path.
    Missing,
    /// An existing directory.
    Dir,
    /// An existing entry that is not a directory.
    NotDir,
}

pub fn dir_state(path: &Path) -> DirState {
    match path.metadata() {
        Ok(metadata) if metadata.is_dir() => DirState::Dir,
        Ok(_) => DirState::NotDir,
        Err(_) => DirState::Missing,
    }
}

/// Verifies the directory exists and is empty.
pub fn ensure_empty_dir(path: &Path) -> Result<()> {
    match dir_state(path) {
        DirState::Missing => Err(EmountError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidPath,
            format!("{} does not exist", path.display()),
        )),
        DirState::NotDir => Err(EmountError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidPath,
            format!("{} is not a directory", path.display()),
        )),
        DirState::Dir => {
            let mut entries = fs::read_dir(path).map_err(|e| {
                EmountError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to read directory {}", path.display()),
                    e,
                )
            })?;
            if entries.next().is_some() {
                return Err(EmountError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::DirectoryNotEmpty,
                    format!("directory {} is not empty", path.display()),
                ));
            }
            Ok(())
        }
    }
}

fn create_private_dir(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(path).map_err(|e| {
        EmountError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to create directory {}", path.display()),
            e,
        )
    })
}

fn read_nonempty_passphrase(reader: &mut dyn PassphraseReader) -> Result<Zeroizing<String>> {
    let passphrase = reader.read_passphrase()?;
    if passphrase.is_empty() {
        return Err(EmountError::with_kind(
            ErrorCategory::User,
            ErrorKind::PassphraseUnavailable,
            "passphrase may not be empty",
        ));
    }
    Ok(passphrase)
}

/// Initializes an encrypted volume at `path`.
///
/// The path must not exist yet (it is created with mode 0700) or must be an
/// empty directory. With `seed_from`, the new volume is mounted once and
/// populated with a recursive copy of the source folder's contents.
pub fn init_volume(
    engine: &GocryptfsCommand,
    path: &Path,
    seed_from: Option<&Path>,
    reader: &mut dyn PassphraseReader,
) -> Result<()> {
    match dir_state(path) {
        DirState::NotDir => {
            return Err(EmountError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidPath,
                format!("invalid volume path: {} is not a directory", path.display()),
            ));
        }
        DirState::Dir => ensure_empty_dir(path)?,
        DirState::Missing => create_private_dir(path)?,
    }

    if let Some(from) = seed_from {
        if dir_state(from) != DirState::Dir {
            return Err(EmountError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidPath,
                format!("source folder {} is not a directory", from.display()),
            ));
        }
    }

    let passphrase = read_nonempty_passphrase(reader)?;
    engine.init(path, &passphrase)?;

    if let Some(from) = seed_from {
        seed_volume(engine, path, from, &passphrase).map_err(|e| {
            e.with_context(format!(
                "the volume at {} was successfully created, but some files were \
                 not copied into it; if you can fix the underlying error, you \
                 may want to delete the volume and try again",
                path.display()
            ))
        })?;
    }

    Ok(())
}

/// Mounts the freshly initialized volume once, copies `from` into it, then
/// unmounts. The mount is expected to succeed since the volume was just
/// created with the same passphrase; the likely failure source is reading
/// the seed files themselves.
fn seed_volume(
    engine: &GocryptfsCommand,
    crypt_path: &Path,
    from: &Path,
    passphrase: &str,
) -> Result<()> {
    let mountpoint = temp_mountpoint()?;
    engine.mount(crypt_path, mountpoint.path(), passphrase)?;

    let copy_result = copy_tree(from, mountpoint.path());

    if unmount::unmount_volume(mountpoint.path()).is_err() {
        unmount::warn_unmount_failed(mountpoint.path());
        // leave the mountpoint in place rather than deleting through a
        // still-live mount
        let _ = mountpoint.keep();
    }

    copy_result
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    let options = fs_extra::dir::CopyOptions::new().content_only(true);
    fs_extra::dir::copy(from, to, &options).map_err(|e| {
        EmountError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::SeedCopyFailed,
            format!("copying {} into the volume failed: {}", from.display(), e),
            e,
        )
    })?;
    Ok(())
}

fn temp_mountpoint() -> Result<TempDir> {
    let dir = tempfile::Builder::new()
        .prefix(MOUNTPOINT_PREFIX)
        .tempdir()
        .map_err(|e| {
            EmountError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to create temporary mountpoint",
                e,
            )
        })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(DIR_MODE)).map_err(|e| {
            EmountError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to set mountpoint permissions",
                e,
            )
        })?;
    }
    Ok(dir)
}

/// Mounts the volume, runs `command` against the decrypted view, unmounts.
///
/// The command receives the caller's environment plus `EMOUNT_FOLDER` set to
/// the mountpoint. Without an explicit `mountpoint`, a temporary directory
/// is created and removed again after a successful unmount; a caller-supplied
/// mountpoint must be an existing empty directory and is never deleted.
///
/// A failing command still unmounts, and its failure decides the result.
/// An unmount failure after the command ran is reported as a warning only.
pub fn run_with_volume(
    engine: &GocryptfsCommand,
    crypt_path: &Path,
    mountpoint: Option<&Path>,
    command: &[String],
    reader: &mut dyn PassphraseReader,
) -> Result<()> {
    if dir_state(crypt_path) != DirState::Dir {
        return Err(EmountError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidPath,
            format!("invalid volume folder {}", crypt_path.display()),
        ));
    }

    if let Some(mp) = mountpoint {
        ensure_empty_dir(mp).map_err(|e| e.with_context("mountpoint is not usable"))?;
        if mp == crypt_path {
            return Err(EmountError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidPath,
                "mountpoint may not be the same as the volume folder",
            ));
        }
    }

    let (program_name, args) = command.split_first().ok_or_else(|| {
        EmountError::with_kind(
            ErrorCategory::User,
            ErrorKind::CommandNotFound,
            "a command to run is required",
        )
    })?;
    let program = exec::resolve_program(program_name)?;

    let passphrase = read_nonempty_passphrase(reader)?;

    // For a caller-supplied mountpoint `temp` stays None and nothing is
    // deleted afterwards.
    let (mount_path, temp): (PathBuf, Option<TempDir>) = match mountpoint {
        Some(mp) => (mp.to_path_buf(), None),
        None => {
            let dir = temp_mountpoint()?;
            (dir.path().to_path_buf(), Some(dir))
        }
    };

    engine.mount(crypt_path, &mount_path, &passphrase)?;

    let command_result =
        exec::run_command(&program, args, &[(ENV_FOLDER_KEY, mount_path.as_os_str())]);

    if unmount::unmount_volume(&mount_path).is_err() {
        unmount::warn_unmount_failed(&mount_path);
        if let Some(dir) = temp {
            // do not delete through a still-live mount
            let _ = dir.keep();
        }
    }
    // a successfully unmounted temporary mountpoint is removed when `temp`
    // drops here

    command_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passphrase::ConstantPassphraseReader;
    use std::fs;
    use tempfile::TempDir;

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
                "  echo fake-config > \"$4/gocryptfs.conf\"\n",
                "  exit 0\n",
                "fi\n",
                "exit 0\n",
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        GocryptfsCommand::with_binary(script)
    }

    #[test]
    fn test_dir_state() {
        let dir = TempDir::new().unwrap();
        assert_eq!(dir_state(dir.path()), DirState::Dir);
        assert_eq!(dir_state(&dir.path().join("missing")), DirState::Missing);

        let file = dir.path().join("file.txt");
        fs::write(&file, b"x").unwrap();
        assert_eq!(dir_state(&file), DirState::NotDir);
    }

    #[test]
    fn test_ensure_empty_dir() {
        let dir = TempDir::new().unwrap();
        ensure_empty_dir(dir.path()).unwrap();

        fs::write(dir.path().join("abc.txt"), b"hello").unwrap();
        let err = ensure_empty_dir(dir.path()).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::DirectoryNotEmpty));
    }

    #[test]
    fn test_ensure_empty_dir_rejects_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, b"x").unwrap();
        let err = ensure_empty_dir(&file).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::InvalidPath));
    }

    #[test]
    #[cfg(unix)]
    fn test_init_creates_missing_dir_with_private_mode() {
        use std::os::unix::fs::PermissionsExt;

        let bin = TempDir::new().unwrap();
        let engine = fake_engine(&bin);
        let parent = TempDir::new().unwrap();
        let vol = parent.path().join("vault");

        let mut reader = ConstantPassphraseReader::new("hunter2-but-longer");
        init_volume(&engine, &vol, None, &mut reader).unwrap();

        let mode = fs::metadata(&vol).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        assert!(vol.join("gocryptfs.conf").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_init_rejects_nonempty_dir() {
        let bin = TempDir::new().unwrap();
        let engine = fake_engine(&bin);
        let vol = TempDir::new().unwrap();
        fs::write(vol.path().join("existing.txt"), b"x").unwrap();

        let mut reader = ConstantPassphraseReader::new("hunter2-but-longer");
        let err = init_volume(&engine, vol.path(), None, &mut reader).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::DirectoryNotEmpty));
    }

    #[test]
    #[cfg(unix)]
    fn test_init_rejects_empty_passphrase() {
        let bin = TempDir::new().unwrap();
        let engine = fake_engine(&bin);
        let vol = TempDir::new().unwrap();

        let mut reader = ConstantPassphraseReader::new("");
        let err = init_volume(&engine, vol.path(), None, &mut reader).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::PassphraseUnavailable));
    }

    #[test]
    #[cfg(unix)]
    fn test_init_rejects_missing_seed_folder() {
        let bin = TempDir::new().unwrap();
        let engine = fake_engine(&bin);
        let vol = TempDir::new().unwrap();

        let mut reader = ConstantPassphraseReader::new("hunter2-but-longer");
        let err = init_volume(
            &engine,
            vol.path(),
            Some(Path::new("/no/such/source")),
            &mut reader,
        )
        .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::InvalidPath));
        // validation failed before the engine ran
        assert!(!vol.path().join("gocryptfs.conf").exists());
    }

    #[test]
    fn test_run_rejects_mountpoint_equal_to_volume() {
        let engine = GocryptfsCommand::default();
        let vol = TempDir::new().unwrap();

        let mut reader = ConstantPassphraseReader::new("pw");
        let err = run_with_volume(
            &engine,
            vol.path(),
            Some(vol.path()),
            &["true".to_string()],
            &mut reader,
        )
        .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::InvalidPath));
    }

    #[test]
    fn test_run_rejects_missing_volume() {
        let engine = GocryptfsCommand::default();
        let mut reader = ConstantPassphraseReader::new("pw");
        let err = run_with_volume(
            &engine,
            Path::new("/no/such/volume"),
            None,
            &["true".to_string()],
            &mut reader,
        )
        .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::InvalidPath));
    }

    #[test]
    fn test_run_rejects_empty_command() {
        let engine = GocryptfsCommand::default();
        let vol = TempDir::new().unwrap();
        let mut reader = ConstantPassphraseReader::new("pw");
        let err = run_with_volume(&engine, vol.path(), None, &[], &mut reader).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::CommandNotFound));
    }

    #[test]
    fn test_run_rejects_unknown_program_before_mounting() {
        let engine = GocryptfsCommand::default();
        let vol = TempDir::new().unwrap();
        let mut reader = ConstantPassphraseReader::new("pw");
        let err = run_with_volume(
            &engine,
            vol.path(),
            None,
            &["definitely-no-such-program-xyzzy".to_string()],
            &mut reader,
        )
        .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::CommandNotFound));
    }
}
