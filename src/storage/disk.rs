//! Directory-backed medium used by the binary. Mounting maps to ensuring
//! the root directory exists; presence is the mounted flag, so a deleted
//! root shows up exactly like a yanked card: via the probe.

use super::{MediumKind, StorageMedium};
use crate::error::CamError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

pub struct DirMedium {
    kind: MediumKind,
    root: PathBuf,
    mounted: AtomicBool,
}

impl DirMedium {
    pub fn new(kind: MediumKind, root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            root: root.into(),
            mounted: AtomicBool::new(false),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl StorageMedium for DirMedium {
    fn kind(&self) -> MediumKind {
        self.kind
    }

    fn is_present(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn mount(&self) -> Result<(), CamError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| CamError::StorageWriteFailed(format!("mount {:?}: {}", self.root, e)))?;
        self.mounted.store(true, Ordering::SeqCst);
        info!(kind = ?self.kind, root = %self.root.display(), "medium mounted");
        Ok(())
    }

    fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send>, CamError> {
        if !self.mounted.load(Ordering::SeqCst) {
            return Err(CamError::StorageUnmounted);
        }
        let full = self.resolve(path);
        if !Path::new(&self.root).is_dir() {
            // Root vanished underneath the mount; surfaces as an open failure
            // so the probe-and-remount path can recover.
            return Err(CamError::StorageWriteFailed(format!(
                "root {:?} missing",
                self.root
            )));
        }
        let file = fs::File::create(&full)
            .map_err(|e| CamError::StorageWriteFailed(format!("open {:?}: {}", full, e)))?;
        Ok(Box::new(file))
    }

    fn remove(&self, path: &str) -> Result<(), CamError> {
        let full = self.resolve(path);
        fs::remove_file(&full)
            .map_err(|e| CamError::StorageWriteFailed(format!("remove {:?}: {}", full, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MountManager, MountState};

    #[test]
    fn test_mount_creates_root_and_probe_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let medium = DirMedium::new(MediumKind::Sd, dir.path().join("sd"));
        let mounts = MountManager::new();

        assert!(mounts.ensure_mounted(&medium));
        assert_eq!(mounts.state(), MountState::Sd);
        assert!(dir.path().join("sd").is_dir());

        // A second pass exercises the sentinel probe on the live mount.
        assert!(mounts.ensure_mounted(&medium));
        assert_eq!(mounts.state(), MountState::Sd);
    }

    #[test]
    fn test_write_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let medium = DirMedium::new(MediumKind::Mmc, dir.path());
        medium.mount().unwrap();

        {
            let mut file = medium.open_write("/pic.jpg").unwrap();
            file.write_all(b"bytes").unwrap();
        }
        assert_eq!(fs::read(dir.path().join("pic.jpg")).unwrap(), b"bytes");

        medium.remove("/pic.jpg").unwrap();
        assert!(!dir.path().join("pic.jpg").exists());
    }

    #[test]
    fn test_unmounted_open_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let medium = DirMedium::new(MediumKind::Sd, dir.path());
        assert!(medium.open_write("/pic.jpg").is_err());
    }
}
