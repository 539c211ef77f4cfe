//! Loopback mounts for source images.
//!
//! The mount driver abstracts the OS mount primitives:
//! - `mount -o loop,ro` to attach an ISO at a scratch path
//! - `umount` to release it
//! - `mount` (no arguments) to read the mount table
//!
//! A fake in-memory driver is provided for testing.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Result};
use tracing::{debug, info};

use super::copy::copy_dir_contents;

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Device or source file.
    pub source: PathBuf,
    /// Where it is mounted.
    pub mount_point: PathBuf,
}

/// Mount primitives.
///
/// Calls block until the underlying operation finishes; no timeout is
/// applied.
pub trait MountDriver: Send + Sync {
    /// Attach `source` read-only at `target` through a loop device.
    fn mount(&self, source: &Path, target: &Path) -> Result<()>;

    /// Detach whatever is mounted at `target`.
    fn unmount(&self, target: &Path) -> Result<()>;

    /// Current mount table.
    fn list(&self) -> Result<Vec<MountEntry>>;
}

/// Driver that shells out to `mount`/`umount`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMountDriver;

impl MountDriver for SystemMountDriver {
    fn mount(&self, source: &Path, target: &Path) -> Result<()> {
        let status = Command::new("mount")
            .args(["-o", "loop,ro"])
            .arg(source)
            .arg(target)
            .stderr(Stdio::null())
            .status()?;

        if !status.success() {
            bail!("mount exited with {}", status);
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let status = Command::new("umount")
            .arg(target)
            .stderr(Stdio::null())
            .status()?;

        if !status.success() {
            bail!("umount exited with {}", status);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<MountEntry>> {
        let output = Command::new("mount").stderr(Stdio::null()).output()?;
        if !output.status.success() {
            bail!("mount exited with {}", output.status);
        }
        Ok(parse_mount_table(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `mount` output: `<source> on <mount point> type <fstype> (<opts>)`.
///
/// Lines that don't have the `on` separator are skipped.
pub fn parse_mount_table(output: &str) -> Vec<MountEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (source, rest) = line.split_once(" on ")?;
            let mount_point = match rest.split_once(" type ") {
                Some((mount_point, _)) => mount_point,
                // BSD style: `<source> on <mount point> (<opts>)`
                None => rest.split(" (").next()?,
            };
            Some(MountEntry {
                source: PathBuf::from(source.trim()),
                mount_point: PathBuf::from(mount_point.trim()),
            })
        })
        .collect()
}

/// In-memory mount table for tests.
///
/// Registered images are directories standing in for ISO contents;
/// mounting one copies its tree into the target.
#[derive(Default)]
pub struct FakeMountDriver {
    images: Mutex<HashMap<PathBuf, PathBuf>>,
    table: Mutex<Vec<MountEntry>>,
    mount_calls: AtomicUsize,
    fail_mounts: bool,
    fail_list: bool,
}

impl FakeMountDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fake driver that fails all mounts.
    pub fn failing() -> Self {
        Self {
            fail_mounts: true,
            ..Self::default()
        }
    }

    /// Create a fake driver whose mount table can't be read.
    pub fn without_mount_table() -> Self {
        Self {
            fail_list: true,
            ..Self::default()
        }
    }

    /// Register `contents` as the tree exposed when `source` is mounted.
    pub fn register_image(&self, source: impl Into<PathBuf>, contents: impl Into<PathBuf>) {
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.into(), contents.into());
    }

    /// Number of mount calls issued.
    pub fn mount_calls(&self) -> usize {
        self.mount_calls.load(Ordering::SeqCst)
    }

    pub fn is_mounted_at(&self, target: &Path) -> bool {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.mount_point == target)
    }
}

impl MountDriver for FakeMountDriver {
    fn mount(&self, source: &Path, target: &Path) -> Result<()> {
        self.mount_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_mounts {
            bail!("fake driver configured to fail");
        }

        let registered = self
            .images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned();
        let contents = match registered {
            Some(contents) => contents,
            None => bail!("no image registered for {}", source.display()),
        };
        copy_dir_contents(&contents, target)?;

        debug!(source = %source.display(), target = %target.display(), "[FAKE] mounted");
        self.table.lock().unwrap_or_else(PoisonError::into_inner).push(MountEntry {
            source: source.to_path_buf(),
            mount_point: target.to_path_buf(),
        });
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let before = table.len();
        table.retain(|e| e.mount_point != target);
        if table.len() == before {
            bail!("{} is not mounted", target.display());
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<MountEntry>> {
        if self.fail_list {
            bail!("mount table unavailable");
        }
        Ok(self.table.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

/// Mount manager: logging and fail-soft semantics over a [`MountDriver`].
#[derive(Clone)]
pub struct MountManager {
    driver: Arc<dyn MountDriver>,
}

impl MountManager {
    pub fn new(driver: Arc<dyn MountDriver>) -> Self {
        Self { driver }
    }

    /// Current mount table.
    ///
    /// Returns an empty list when the table can't be read, so an empty
    /// result means "unknown", not "nothing mounted".
    pub fn list_mounts(&self) -> Vec<MountEntry> {
        match self.driver.list() {
            Ok(mounts) => mounts,
            Err(e) => {
                debug!(error = %e, "could not read mount table");
                Vec::new()
            }
        }
    }

    /// True if `source` is mounted exactly at `mount_point`.
    pub fn is_mounted(&self, source: &Path, mount_point: &Path) -> bool {
        self.list_mounts()
            .iter()
            .any(|m| m.source == source && m.mount_point == mount_point)
    }

    /// Create `mount_point` if needed and loop-mount `source` on it.
    pub fn mount(&self, source: &Path, mount_point: &Path) -> bool {
        if !mount_point.is_dir() {
            if let Err(e) = fs::create_dir_all(mount_point) {
                debug!(
                    mount_point = %mount_point.display(),
                    error = %e,
                    "could not create mount point"
                );
                return false;
            }
        }

        match self.driver.mount(source, mount_point) {
            Ok(()) => {
                info!(
                    source = %source.display(),
                    mount_point = %mount_point.display(),
                    "mounted"
                );
                true
            }
            Err(e) => {
                debug!(
                    source = %source.display(),
                    mount_point = %mount_point.display(),
                    error = %e,
                    "could not mount"
                );
                false
            }
        }
    }

    /// Unmount `mount_point`. The result is advisory.
    pub fn unmount(&self, mount_point: &Path) -> bool {
        match self.driver.unmount(mount_point) {
            Ok(()) => {
                debug!(mount_point = %mount_point.display(), "unmounted");
                true
            }
            Err(e) => {
                debug!(
                    mount_point = %mount_point.display(),
                    error = %e,
                    "could not unmount"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MOUNT_OUTPUT: &str = "\
proc on /proc type proc (rw,nosuid,nodev,noexec,relatime)
/dev/sda1 on / type ext4 (rw,relatime)
/srv/isos/ubuntu.iso on /tmp/mounts/abc type iso9660 (ro,relatime,nojoliet)
/dev/disk1s1 on /System/Volumes/Data (apfs, local, journaled)
garbage line
";

    #[test]
    fn test_parse_mount_table() {
        let mounts = parse_mount_table(MOUNT_OUTPUT);
        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[1].source, PathBuf::from("/dev/sda1"));
        assert_eq!(mounts[1].mount_point, PathBuf::from("/"));
        assert_eq!(mounts[2].source, PathBuf::from("/srv/isos/ubuntu.iso"));
        assert_eq!(mounts[2].mount_point, PathBuf::from("/tmp/mounts/abc"));
        assert_eq!(mounts[3].mount_point, PathBuf::from("/System/Volumes/Data"));
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_mount_table("").is_empty());
    }

    #[test]
    fn test_list_fails_soft() {
        let manager = MountManager::new(Arc::new(FakeMountDriver::without_mount_table()));
        assert!(manager.list_mounts().is_empty());
        assert!(!manager.is_mounted(Path::new("/a.iso"), Path::new("/mnt")));
    }

    #[test]
    fn test_mount_creates_mount_point_and_registers() {
        let contents = tempdir().unwrap();
        fs::write(contents.path().join("vmlinuz"), "kernel").unwrap();
        let scratch = tempdir().unwrap();
        let mount_point = scratch.path().join("nested/uuid");

        let driver = Arc::new(FakeMountDriver::new());
        driver.register_image("/srv/disk.iso", contents.path());
        let manager = MountManager::new(driver.clone());

        assert!(manager.mount(Path::new("/srv/disk.iso"), &mount_point));
        assert!(mount_point.join("vmlinuz").exists());
        assert!(manager.is_mounted(Path::new("/srv/disk.iso"), &mount_point));
        // Exact pair only
        assert!(!manager.is_mounted(Path::new("/srv/other.iso"), &mount_point));
        assert!(!manager.is_mounted(Path::new("/srv/disk.iso"), scratch.path()));

        assert!(manager.unmount(&mount_point));
        assert!(!manager.is_mounted(Path::new("/srv/disk.iso"), &mount_point));
    }

    #[test]
    fn test_failing_mount_and_unmount_are_soft() {
        let scratch = tempdir().unwrap();
        let manager = MountManager::new(Arc::new(FakeMountDriver::failing()));

        assert!(!manager.mount(Path::new("/srv/disk.iso"), scratch.path()));
        assert!(!manager.unmount(scratch.path()));
    }

    #[test]
    fn test_fake_driver_survives_poisoned_table() {
        let contents = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let driver = Arc::new(FakeMountDriver::new());
        driver.register_image("/srv/disk.iso", contents.path());

        let poisoner = Arc::clone(&driver);
        let joined = std::thread::spawn(move || {
            let _table = poisoner.table.lock().unwrap();
            panic!("panic while holding the mount table");
        })
        .join();
        assert!(joined.is_err());
        assert!(driver.table.is_poisoned());

        let manager = MountManager::new(driver.clone());
        assert!(manager.list_mounts().is_empty());
        assert!(manager.mount(Path::new("/srv/disk.iso"), scratch.path()));
        assert!(driver.is_mounted_at(scratch.path()));
        assert!(manager.unmount(scratch.path()));
    }
}
