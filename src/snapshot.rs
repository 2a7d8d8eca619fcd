//! Captures one frame and persists it to the mounted medium, with one
//! level of automatic remount-and-retry for a swapped card.

use crate::error::CamError;
use crate::gate::SensorGate;
use crate::sensor::{FrameBuffer, ImageSensor};
use crate::storage::{MountManager, MountState, StorageMedium};
use chrono::Local;
use std::sync::Arc;
use tracing::{debug, error};

/// Extension forced onto exported image files.
pub const EXPORT_EXT: &str = ".jpg";

pub struct Exporter {
    sensor: Arc<dyn ImageSensor>,
    gate: Arc<SensorGate>,
    mounts: Arc<MountManager>,
    prefix: String,
}

impl Exporter {
    pub fn new(
        sensor: Arc<dyn ImageSensor>,
        gate: Arc<SensorGate>,
        mounts: Arc<MountManager>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            sensor,
            gate,
            mounts,
            prefix: prefix.into(),
        }
    }

    pub fn mounts(&self) -> &MountManager {
        &self.mounts
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// One-shot export: mounts the medium, then holds the gate unbounded
    /// for the capture-and-persist span. Correctness over liveness; this
    /// is a rare, bounded operation.
    pub async fn one_shot(
        &self,
        medium: &dyn StorageMedium,
        filename: Option<&str>,
    ) -> Result<String, CamError> {
        if !self.mounts.ensure_mounted(medium) {
            return Err(CamError::StorageUnmounted);
        }
        let _permit = self.gate.acquire(None).await?;
        self.export_locked(medium, filename)
    }

    /// Export with the gate already held by the caller (the periodic
    /// hand-off task). Acquires the frame exactly once; the remount retry
    /// reuses it and never re-enters frame acquisition.
    pub fn export_locked(
        &self,
        medium: &dyn StorageMedium,
        filename: Option<&str>,
    ) -> Result<String, CamError> {
        let frame = self.sensor.acquire_frame()?;
        let name = self.resolve_name(filename);
        self.write_with_retry(medium, &name, &frame)?;
        debug!(file = %name, bytes = %frame.len(), "snapshot exported");
        Ok(name)
        // frame drops here, returning the buffer to the driver
    }

    /// Final filename: `.jpg` appended unless already present; a missing or
    /// empty name becomes `<prefix><local timestamp>.jpg`.
    fn resolve_name(&self, filename: Option<&str>) -> String {
        match filename {
            Some(name) if !name.is_empty() => {
                if name.ends_with(EXPORT_EXT) {
                    name.to_string()
                } else {
                    format!("{}{}", name, EXPORT_EXT)
                }
            }
            _ => format!("{}{}{}", self.prefix, timestamp(), EXPORT_EXT),
        }
    }

    fn write_with_retry(
        &self,
        medium: &dyn StorageMedium,
        name: &str,
        frame: &FrameBuffer,
    ) -> Result<(), CamError> {
        let mut retried = false;
        loop {
            match write_all(medium, name, frame) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    // A card swapped since the last mount shows up as an
                    // open failure; one remount attempt recovers it.
                    if !retried && self.mounts.state() != MountState::None {
                        retried = true;
                        if self.mounts.ensure_mounted(medium) {
                            debug!(file = %name, "open failed, retrying after remount");
                            continue;
                        }
                    }
                    error!(file = %name, error = %err, "snapshot export failed");
                    return Err(err);
                }
            }
        }
    }
}

fn write_all(
    medium: &dyn StorageMedium,
    name: &str,
    frame: &FrameBuffer,
) -> Result<(), CamError> {
    let mut file = medium.open_write(name)?;
    file.write_all(frame.data())
        .and_then(|_| file.flush())
        .map_err(|e| CamError::StorageWriteFailed(format!("write {}: {}", name, e)))
}

/// Local-time timestamp at one-second resolution, part of synthesized
/// export filenames. Wall-clock accuracy depends on the host's own time
/// synchronization.
pub(crate) fn timestamp() -> String {
    Local::now().format("%FT%H_%M_%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::mock::MockSensor;
    use crate::storage::mock::MockMedium;
    use crate::storage::MediumKind;
    use assert_matches::assert_matches;

    fn exporter(sensor: Arc<MockSensor>) -> Exporter {
        Exporter::new(
            sensor,
            Arc::new(SensorGate::new()),
            Arc::new(MountManager::new()),
            "/webcam",
        )
    }

    #[tokio::test]
    async fn test_explicit_jpg_name_kept_verbatim() {
        let sensor = Arc::new(MockSensor::jpeg());
        let medium = MockMedium::new(MediumKind::Sd);
        let name = exporter(Arc::clone(&sensor))
            .one_shot(&medium, Some("/pic.jpg"))
            .await
            .unwrap();
        assert_eq!(name, "/pic.jpg");
        assert!(medium.exists("/pic.jpg"));
        assert_eq!(sensor.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_extension_appended() {
        let sensor = Arc::new(MockSensor::jpeg());
        let medium = MockMedium::new(MediumKind::Sd);
        let exporter = exporter(Arc::clone(&sensor));

        let name = exporter.one_shot(&medium, Some("/pic.png")).await.unwrap();
        assert_eq!(name, "/pic.png.jpg");

        let name = exporter.one_shot(&medium, Some("/plain")).await.unwrap();
        assert_eq!(name, "/plain.jpg");
    }

    #[tokio::test]
    async fn test_missing_and_empty_names_are_synthesized() {
        let sensor = Arc::new(MockSensor::jpeg());
        let medium = MockMedium::new(MediumKind::Mmc);
        let exporter = exporter(Arc::clone(&sensor));

        for filename in [None, Some("")] {
            let name = exporter.one_shot(&medium, filename).await.unwrap();
            assert!(name.starts_with("/webcam"), "got {}", name);
            assert!(name.ends_with(EXPORT_EXT));
            // Prefix + 19-char timestamp + extension
            assert_eq!(name.len(), "/webcam".len() + 19 + EXPORT_EXT.len());
        }
    }

    #[tokio::test]
    async fn test_open_failure_recovers_with_one_remount() {
        let sensor = Arc::new(MockSensor::jpeg());
        let medium = MockMedium::new(MediumKind::Sd);
        let exporter = exporter(Arc::clone(&sensor));

        // First export records the mount; the injected failures then hit
        // both the write open and the liveness probe, forcing a remount.
        exporter.one_shot(&medium, Some("/seed.jpg")).await.unwrap();
        medium.fail_next_opens(2);

        let name = exporter.one_shot(&medium, Some("/after-swap.jpg")).await;
        // one_shot's ensure_mounted consumed the failures via remount; the
        // write itself then succeeded without the in-export retry.
        assert!(name.is_ok());
        assert!(medium.exists("/after-swap.jpg"));
        assert_eq!(sensor.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_in_export_retry_runs_exactly_once() {
        let sensor = Arc::new(MockSensor::jpeg());
        let medium = MockMedium::new(MediumKind::Sd);
        let exporter = exporter(Arc::clone(&sensor));

        // Record the mount, then inject the open failure after the mount
        // probe has already passed: only the export's own retry can save it.
        exporter.mounts().ensure_mounted(&medium);
        medium.fail_next_opens(1);

        let permit_free_result = exporter.export_locked(&medium, Some("/retry.jpg"));
        assert!(permit_free_result.is_ok());
        assert!(medium.exists("/retry.jpg"));
        // One frame acquisition despite the retried write.
        assert_eq!(sensor.acquired_total(), 1);
        assert_eq!(sensor.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_retry_failure_surfaces_and_releases_frame() {
        let sensor = Arc::new(MockSensor::jpeg());
        let medium = MockMedium::new(MediumKind::Sd);
        let exporter = exporter(Arc::clone(&sensor));

        exporter.mounts().ensure_mounted(&medium);
        medium.fail_next_opens(usize::MAX);
        medium.set_mount_ok(false);

        let err = exporter
            .export_locked(&medium, Some("/doomed.jpg"))
            .unwrap_err();
        assert_matches!(err, CamError::StorageWriteFailed(_));
        assert_eq!(sensor.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_unmountable_medium_short_circuits() {
        let sensor = Arc::new(MockSensor::jpeg());
        let medium = MockMedium::new(MediumKind::Sd);
        medium.set_present(false);
        medium.set_mount_ok(false);

        let exporter = exporter(Arc::clone(&sensor));
        let err = exporter.one_shot(&medium, None).await.unwrap_err();
        assert_matches!(err, CamError::StorageUnmounted);
        // The sensor was never touched.
        assert_eq!(sensor.acquired_total(), 0);
    }

    #[tokio::test]
    async fn test_sensor_failure_is_resource_unavailable() {
        let sensor = Arc::new(MockSensor::jpeg());
        sensor.set_fail_acquire(true);
        let medium = MockMedium::new(MediumKind::Sd);

        let err = exporter(Arc::clone(&sensor))
            .one_shot(&medium, None)
            .await
            .unwrap_err();
        assert_matches!(err, CamError::ResourceUnavailable(_));
    }
}
