//! Platform unmount for decrypted views.
//!
//! Uses a detach-style unmount so the mount disappears from the namespace
//! immediately, while resource release is deferred until any open handles
//! are closed. MNT_FORCE is never used as it may lead to data corruption
//! or loss.

use crate::error::{EmountError, ErrorCategory, ErrorKind, Result};
use std::path::Path;

/// Unmounts the volume. If it is still in use, returns an error.
///
/// On Linux the raw syscall often fails with "operation not permitted" for
/// FUSE mounts owned by an unprivileged user; `fusermount -u` is installed
/// suid and has a higher success rate, so it is tried as a fallback.
#[cfg(target_os = "linux")]
pub fn unmount_volume(mountpoint: &Path) -> Result<()> {
    use nix::mount::{MntFlags, umount2};

    let syscall_err = match umount2(mountpoint, MntFlags::MNT_DETACH) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    match std::process::Command::new("fusermount")
        .arg("-u")
        .arg(mountpoint)
        .output()
    {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(EmountError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::UnmountFailed,
                format!(
                    "unmount of {} failed [1]: {} [2]: {}",
                    mountpoint.display(),
                    syscall_err,
                    stderr.trim()
                ),
            ))
        }
        // fusermount not installed: report the original syscall failure
        Err(_) => Err(EmountError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::UnmountFailed,
            format!("unmount of {} failed: {}", mountpoint.display(), syscall_err),
        )),
    }
}

/// Unmounts the volume. If it is still in use, returns an error.
///
/// macOS has no MNT_DETACH, so a plain unmount is issued.
#[cfg(target_os = "macos")]
pub fn unmount_volume(mountpoint: &Path) -> Result<()> {
    use nix::mount::{MntFlags, unmount};

    unmount(mountpoint, MntFlags::empty()).map_err(|e| {
        EmountError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::UnmountFailed,
            format!("unmount of {} failed: {}", mountpoint.display(), e),
        )
    })
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn unmount_volume(mountpoint: &Path) -> Result<()> {
    Err(EmountError::with_kind(
        ErrorCategory::Internal,
        ErrorKind::UnmountFailed,
        format!(
            "unmount of {} not supported on this platform",
            mountpoint.display()
        ),
    ))
}

/// Printed when an unmount fails after the user's command already ran.
pub fn warn_unmount_failed(mountpoint: &Path) {
    eprintln!(
        "WARNING: unmounting '{}' failed. Please ensure all files on this \
         volume are closed and try unmounting again. The program 'lsof' may \
         be useful for identifying open file handles.",
        mountpoint.display()
    );
}
