/// Private per-container directory tree on the host.
///
/// Container paths under a *private prefix* (directories and mount targets
/// created for this container) live below the container root on the host.
/// Every other path refers to the shared host system tree, which plays the
/// role of the read-only base image (`/bin/sh`, `/usr/bin/g++`, `/dev/null`).
use crate::config::types::{JudgeError, OwnerId, Result};
use crate::isolation::provider::Filesystem;
use crate::isolation::types::MountEntry;
use log::{debug, error, info, warn};
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

pub struct LocalFilesystem {
    root: PathBuf,
    privileged: bool,
    private_prefixes: Mutex<Vec<PathBuf>>,
    bind_mounts: Mutex<Vec<PathBuf>>,
}

/// Container paths must be absolute and free of `..` so they cannot leave the root
fn validate_container_path(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(JudgeError::Isolation(format!(
            "container path must be absolute: {}",
            path.display()
        )));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(JudgeError::Isolation(format!(
            "container path must not contain '..': {}",
            path.display()
        )));
    }
    Ok(())
}

impl LocalFilesystem {
    pub fn new(root: PathBuf, privileged: bool) -> Self {
        Self {
            root,
            privileged,
            private_prefixes: Mutex::new(Vec::new()),
            bind_mounts: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    fn is_private(&self, path: &Path) -> bool {
        match self.private_prefixes.lock() {
            Ok(prefixes) => prefixes.iter().any(|p| path.starts_with(p)),
            Err(poisoned) => poisoned.into_inner().iter().any(|p| path.starts_with(p)),
        }
    }

    fn register_private(&self, path: &Path) {
        let mut prefixes = self
            .private_prefixes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !prefixes.iter().any(|p| path.starts_with(p)) {
            prefixes.push(path.to_path_buf());
        }
    }

    /// Translate a container path to the host path backing it
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        validate_container_path(path)?;
        if self.is_private(path) {
            Ok(self.host_path(path))
        } else {
            Ok(path.to_path_buf())
        }
    }

    /// Like `resolve`, but the path must belong to this container
    fn resolve_private(&self, path: &Path) -> Result<PathBuf> {
        validate_container_path(path)?;
        if !self.is_private(path) {
            return Err(JudgeError::Isolation(format!(
                "{} is outside the container's private tree",
                path.display()
            )));
        }
        Ok(self.host_path(path))
    }

    /// Absolute arguments naming private files are rewritten to their host location
    pub fn host_argument(&self, argument: &str) -> String {
        let path = Path::new(argument);
        if validate_container_path(path).is_ok() && self.is_private(path) {
            self.host_path(path).to_string_lossy().into_owned()
        } else {
            argument.to_string()
        }
    }

    fn apply_owner_and_mode(&self, host_path: &Path, owner: OwnerId, mode: u32) -> Result<()> {
        if self.privileged {
            nix::unistd::chown(
                host_path,
                Some(nix::unistd::Uid::from_raw(owner.uid)),
                Some(nix::unistd::Gid::from_raw(owner.gid)),
            )
            .map_err(|e| {
                JudgeError::Isolation(format!(
                    "Failed to set ownership {} on {}: {}",
                    owner,
                    host_path.display(),
                    e
                ))
            })?;
        } else if owner != OwnerId::current() {
            debug!(
                "Not running as root, keeping ownership of {} (requested {})",
                host_path.display(),
                owner
            );
        }
        fs::set_permissions(host_path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    /// Replace an existing (possibly read-only) file
    fn remove_existing(host_path: &Path) -> Result<()> {
        match fs::remove_file(host_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Make a host directory visible at `mount.target`.
    ///
    /// Bind mounts need root; otherwise the directory is copied, with write
    /// bits stripped when the mount is read-only.
    pub fn bind(&self, mount: &MountEntry) -> Result<()> {
        validate_container_path(&mount.target)?;
        if !mount.source.is_dir() {
            return Err(JudgeError::Isolation(format!(
                "mount source is not a directory: {}",
                mount.source.display()
            )));
        }
        self.register_private(&mount.target);
        let target = self.host_path(&mount.target);
        fs::create_dir_all(&target)?;

        if self.privileged {
            match bind_mount(&mount.source, &target, mount.read_only) {
                Ok(()) => {
                    self.bind_mounts
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(target.clone());
                    info!(
                        "Bound {} to {} (read_only={})",
                        mount.source.display(),
                        mount.target.display(),
                        mount.read_only
                    );
                    return Ok(());
                }
                Err(e) => warn!(
                    "Failed to bind mount {} to {}: {} (falling back to file copy)",
                    mount.source.display(),
                    target.display(),
                    e
                ),
            }
        }

        copy_directory_contents(&mount.source, &target, mount.read_only)?;
        debug!(
            "Copied {} to {} (bind mount unavailable)",
            mount.source.display(),
            mount.target.display()
        );
        Ok(())
    }

    /// Unmount binds and remove the private tree.
    ///
    /// The tree is left in place if any unmount fails: removing it would
    /// recurse into the bound host directory.
    pub fn teardown(&self) -> Result<()> {
        let mounts: Vec<PathBuf> = self
            .bind_mounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        let mut failed = Vec::new();
        for target in mounts.iter().rev() {
            if let Err(e) = nix::mount::umount2(target, nix::mount::MntFlags::MNT_DETACH) {
                error!("Failed to unmount {}: {}", target.display(), e);
                failed.push(target.display().to_string());
            }
        }
        if !failed.is_empty() {
            return Err(JudgeError::Isolation(format!(
                "leaving {} in place, unmount failed for: {}",
                self.root.display(),
                failed.join(", ")
            )));
        }

        if self.root.exists() {
            make_tree_removable(&self.root);
            fs::remove_dir_all(&self.root).map_err(|e| {
                JudgeError::Isolation(format!(
                    "Failed to remove container root {}: {}",
                    self.root.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

impl Filesystem for LocalFilesystem {
    fn push(&self, source: &Path, destination: &Path, owner: OwnerId, mode: u32) -> Result<()> {
        let target = self.resolve_private(destination)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::remove_existing(&target)?;
        fs::copy(source, &target).map_err(|e| {
            JudgeError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to copy {} to {}: {}",
                    source.display(),
                    destination.display(),
                    e
                ),
            ))
        })?;
        self.apply_owner_and_mode(&target, owner, mode)?;
        debug!(
            "Pushed {} -> {} ({} mode {:o})",
            source.display(),
            destination.display(),
            owner,
            mode
        );
        Ok(())
    }

    fn write(&self, destination: &Path, contents: &[u8], owner: OwnerId, mode: u32) -> Result<()> {
        let target = self.resolve_private(destination)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::remove_existing(&target)?;
        fs::write(&target, contents)?;
        self.apply_owner_and_mode(&target, owner, mode)
    }

    fn create_directory(&self, path: &Path, owner: OwnerId, mode: u32) -> Result<()> {
        validate_container_path(path)?;
        self.register_private(path);
        let target = self.host_path(path);
        fs::create_dir_all(&target)?;
        // Without root the provider itself must keep write access to stage files.
        let effective_mode = if self.privileged { mode } else { mode | 0o700 };
        self.apply_owner_and_mode(&target, owner, effective_mode)
    }

    fn read(&self, path: &Path, limit: usize) -> Result<Option<Vec<u8>>> {
        let host = self.resolve(path)?;
        let file = match fs::File::open(&host) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut buffer = Vec::new();
        file.take(limit as u64).read_to_end(&mut buffer)?;
        Ok(Some(buffer))
    }

    fn pull(&self, source: &Path, destination: &Path) -> Result<()> {
        let host = self.resolve(source)?;
        fs::copy(&host, destination)?;
        Ok(())
    }
}

fn bind_mount(source: &Path, target: &Path, read_only: bool) -> nix::Result<()> {
    use nix::mount::{mount, MsFlags};

    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )?;
    if read_only {
        // Read-only only takes effect on a remount of the bind.
        let remount = mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_BIND
                | MsFlags::MS_REMOUNT
                | MsFlags::MS_RDONLY
                | MsFlags::MS_NOSUID
                | MsFlags::MS_NODEV,
            None::<&str>,
        );
        if let Err(e) = remount {
            let _ = nix::mount::umount2(target, nix::mount::MntFlags::MNT_DETACH);
            return Err(e);
        }
    }
    Ok(())
}

fn copy_directory_contents(source: &Path, target: &Path, read_only: bool) -> Result<()> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let source_path = entry.path();
        let target_path = target.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            copy_directory_contents(&source_path, &target_path, read_only)?;
        } else if file_type.is_file() {
            fs::copy(&source_path, &target_path)?;
            if read_only {
                let mode = fs::metadata(&target_path)?.permissions().mode();
                fs::set_permissions(&target_path, fs::Permissions::from_mode(mode & !0o222))?;
            }
        }
    }
    Ok(())
}

/// Restore owner write/exec bits on directories so removal can descend
fn make_tree_removable(path: &Path) {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return;
    };
    if !metadata.is_dir() {
        return;
    }
    let mode = metadata.permissions().mode();
    if mode & 0o700 != 0o700 {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o700));
    }
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            make_tree_removable(&entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> (tempfile::TempDir, LocalFilesystem) {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path().join(name), false);
        (dir, fs)
    }

    #[test]
    fn private_paths_resolve_under_root() {
        let (_dir, local) = scratch("c1");
        local
            .create_directory(Path::new("/tmp/checking"), OwnerId::current(), 0o555)
            .unwrap();
        assert_eq!(
            local.resolve(Path::new("/tmp/checking/in")).unwrap(),
            local.root().join("tmp/checking/in")
        );
        assert_eq!(
            local.resolve(Path::new("/dev/null")).unwrap(),
            PathBuf::from("/dev/null")
        );
    }

    #[test]
    fn relative_and_parent_paths_are_rejected() {
        let (_dir, local) = scratch("c2");
        assert!(local.resolve(Path::new("tmp/in")).is_err());
        assert!(local.resolve(Path::new("/tmp/../etc/passwd")).is_err());
    }

    #[test]
    fn push_outside_private_tree_is_rejected() {
        let (dir, local) = scratch("c3");
        let source = dir.path().join("input.txt");
        fs::write(&source, b"1 2").unwrap();
        let err = local
            .push(&source, Path::new("/etc/input"), OwnerId::current(), 0o444)
            .unwrap_err();
        assert!(matches!(err, JudgeError::Isolation(_)));
    }

    #[test]
    fn push_applies_mode_and_read_round_trips() {
        let (dir, local) = scratch("c4");
        local
            .create_directory(Path::new("/tmp/checking"), OwnerId::current(), 0o555)
            .unwrap();
        let source = dir.path().join("input.txt");
        fs::write(&source, b"1 2").unwrap();
        local
            .push(&source, Path::new("/tmp/checking/in"), OwnerId::current(), 0o444)
            .unwrap();

        let host = local.root().join("tmp/checking/in");
        assert_eq!(fs::metadata(&host).unwrap().permissions().mode() & 0o777, 0o444);
        assert_eq!(
            local.read(Path::new("/tmp/checking/in"), 1).unwrap(),
            Some(b"1".to_vec())
        );
        assert_eq!(local.read(Path::new("/tmp/checking/missing"), 16).unwrap(), None);
    }

    #[test]
    fn arguments_naming_private_files_are_rewritten() {
        let (_dir, local) = scratch("c5");
        local
            .create_directory(Path::new("/tmp/build"), OwnerId::current(), 0o755)
            .unwrap();
        assert_eq!(
            local.host_argument("/tmp/build/source.py"),
            local.root().join("tmp/build/source.py").to_string_lossy()
        );
        assert_eq!(local.host_argument("-O2"), "-O2");
        assert_eq!(local.host_argument("/dev/null"), "/dev/null");
    }

    #[test]
    fn copy_fallback_strips_write_bits_and_teardown_removes_tree() {
        let (dir, local) = scratch("c6");
        let package = dir.path().join("package");
        fs::create_dir_all(package.join("bin")).unwrap();
        fs::write(package.join("bin/checker"), b"#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(package.join("bin/checker"), fs::Permissions::from_mode(0o755)).unwrap();

        local
            .create_directory(Path::new("/tmp/checking"), OwnerId::current(), 0o555)
            .unwrap();
        local
            .bind(&MountEntry::bind_ro(&package, "/tmp/checking/package"))
            .unwrap();

        let copied = local.root().join("tmp/checking/package/bin/checker");
        assert_eq!(fs::metadata(&copied).unwrap().permissions().mode() & 0o777, 0o555);

        local.teardown().unwrap();
        assert!(!local.root().exists());
        assert!(package.join("bin/checker").exists());
    }
}
