//! Removable-media abstraction and mount recovery.
//!
//! Two physically different media (SPI-attached SD and MMC-bus SD) sit
//! behind one capability trait instead of the driver-level base-pointer
//! punning. The mount manager is the only component that decides whether
//! a medium is actually usable; a sentinel-file probe is the sole way a
//! physical card swap is detected.

pub mod disk;
pub mod mock;

use crate::error::CamError;
use parking_lot::Mutex;
use std::io::Write;
use tracing::debug;

/// Name of the sentinel file used to probe mount liveness.
pub const MOUNT_PROBE: &str = "/_~webcam~";

/// Which physical medium a handle talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumKind {
    Sd,
    Mmc,
}

/// Which medium is currently mounted, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    None,
    Sd,
    Mmc,
}

impl From<MediumKind> for MountState {
    fn from(kind: MediumKind) -> Self {
        match kind {
            MediumKind::Sd => MountState::Sd,
            MediumKind::Mmc => MountState::Mmc,
        }
    }
}

/// Capability set of one removable medium: {probe-present, mount, unmount,
/// open, remove}.
pub trait StorageMedium: Send + Sync {
    fn kind(&self) -> MediumKind;

    /// Whether the driver currently reports a mounted medium. A stale
    /// `true` after a physical card swap is expected; the probe catches it.
    fn is_present(&self) -> bool;

    fn mount(&self) -> Result<(), CamError>;

    fn unmount(&self);

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send>, CamError>;

    fn remove(&self, path: &str) -> Result<(), CamError>;
}

/// Tracks and recovers the mounted state of the removable medium.
pub struct MountManager {
    state: Mutex<MountState>,
}

impl MountManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MountState::None),
        }
    }

    pub fn state(&self) -> MountState {
        *self.state.lock()
    }

    /// Brings `medium` into a writable state, remounting if the current
    /// mount has gone stale. Returns false (and records `MountState::None`)
    /// if no attempt succeeds.
    ///
    /// The liveness probe opens and removes a sentinel file; a
    /// write-protected card therefore cannot be told apart from a removed
    /// one, matching the original driver behavior.
    pub fn ensure_mounted(&self, medium: &dyn StorageMedium) -> bool {
        let ok = if !medium.is_present() {
            medium.mount().is_ok()
        } else {
            match medium.open_write(MOUNT_PROBE) {
                Ok(probe) => {
                    drop(probe);
                    medium.remove(MOUNT_PROBE).is_ok()
                }
                Err(_) => {
                    debug!(kind = ?medium.kind(), "mount gone stale, remounting");
                    medium.unmount();
                    medium.mount().is_ok()
                }
            }
        };

        *self.state.lock() = if ok {
            medium.kind().into()
        } else {
            MountState::None
        };
        ok
    }
}

impl Default for MountManager {
    fn default() -> Self {
        Self::new()
    }
}
