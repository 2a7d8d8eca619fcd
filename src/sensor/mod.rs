//! Image sensor abstraction.
//!
//! The physical driver is an external collaborator; this module defines the
//! interface the server consumes, backed by either the synthetic
//! [`pattern::PatternSensor`] or the instrumented [`mock::MockSensor`].

pub mod mock;
pub mod pattern;

use crate::error::CamError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel format the sensor outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Jpeg,
    Rgb565,
    Grayscale,
    Yuv422,
}

/// Frame sizes the sensor can be programmed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    Qqvga,
    Qvga,
    Vga,
    Svga,
    Xga,
    Hd,
    Sxga,
    Uxga,
}

impl FrameSize {
    /// Pixel dimensions as (width, height).
    pub fn dims(&self) -> (u32, u32) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qvga => (320, 240),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Hd => (1280, 720),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }

    pub fn parse(name: &str) -> Result<Self, CamError> {
        match name {
            "qqvga" => Ok(FrameSize::Qqvga),
            "qvga" => Ok(FrameSize::Qvga),
            "vga" => Ok(FrameSize::Vga),
            "svga" => Ok(FrameSize::Svga),
            "xga" => Ok(FrameSize::Xga),
            "hd" => Ok(FrameSize::Hd),
            "sxga" => Ok(FrameSize::Sxga),
            "uxga" => Ok(FrameSize::Uxga),
            other => Err(CamError::UnsupportedConfiguration(format!(
                "unknown frame size {:?}",
                other
            ))),
        }
    }
}

/// Camera module the board is wired for. An unrecognized name is an
/// unsupported configuration, reported at init time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraModel {
    WroverKit,
    EspEye,
    M5StackPsram,
    M5StackWide,
    AiThinker,
    TtgoTJournal,
}

impl CameraModel {
    pub fn parse(name: &str) -> Result<Self, CamError> {
        match name {
            "wrover-kit" => Ok(CameraModel::WroverKit),
            "esp-eye" => Ok(CameraModel::EspEye),
            "m5stack-psram" => Ok(CameraModel::M5StackPsram),
            "m5stack-wide" => Ok(CameraModel::M5StackWide),
            "ai-thinker" => Ok(CameraModel::AiThinker),
            "ttgo-t-journal" => Ok(CameraModel::TtgoTJournal),
            other => Err(CamError::UnsupportedConfiguration(format!(
                "unknown camera model {:?}",
                other
            ))),
        }
    }
}

/// Flat record of the sensor's tunable parameters, loadable and savable as
/// one blob through the settings store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorStatus {
    pub frame_size: FrameSize,
    pub quality: u8,
    pub brightness: i8,
    pub contrast: i8,
    pub saturation: i8,
    pub sharpness: i8,
    pub auto_white_balance: bool,
    pub auto_exposure: bool,
    pub exposure_level: i8,
    pub auto_gain: bool,
    pub gain_ceiling: u8,
    pub hmirror: bool,
    pub vflip: bool,
}

impl Default for SensorStatus {
    fn default() -> Self {
        Self {
            frame_size: FrameSize::Svga,
            quality: 80,
            brightness: 0,
            contrast: 0,
            saturation: 0,
            sharpness: 0,
            auto_white_balance: true,
            auto_exposure: true,
            exposure_level: 0,
            auto_gain: true,
            gain_ceiling: 2,
            hmirror: false,
            vflip: false,
        }
    }
}

/// One borrowed sensor capture. The payload is owned by the driver; the
/// buffer carries a release hook that runs exactly once, on drop, on every
/// code path including error paths. Clones of `data()` are refcounted and
/// may legitimately outlive the release hook, so a driver must hand over a
/// payload that stays valid after release rather than a view into memory
/// the hook reclaims.
pub struct FrameBuffer {
    data: Bytes,
    format: PixelFormat,
    width: u32,
    height: u32,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl FrameBuffer {
    pub fn new(data: Bytes, format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            data,
            format,
            width,
            height,
            release: None,
        }
    }

    /// Attaches the driver's release hook.
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Interface to the sensor driver. Exactly one handle exists per process;
/// mutation happens only while the resource lock is held by the mutator.
pub trait ImageSensor: Send + Sync {
    /// Borrows one captured frame from the driver.
    fn acquire_frame(&self) -> Result<FrameBuffer, CamError>;

    /// Reads the current tunable-parameter record.
    fn status(&self) -> Result<SensorStatus, CamError>;

    /// Applies a tunable-parameter record, field by field. Fails if any
    /// individual setter is rejected.
    fn apply_status(&self, status: &SensorStatus) -> Result<(), CamError>;

    fn set_pixel_format(&self, format: PixelFormat) -> Result<(), CamError>;

    fn set_frame_size(&self, size: FrameSize) -> Result<(), CamError>;

    /// Converts a non-JPEG frame, feeding each produced chunk to `sink`.
    /// A sink returning `false` aborts the conversion. Returns the total
    /// number of bytes produced.
    fn encode_jpeg(
        &self,
        frame: &FrameBuffer,
        quality: u8,
        sink: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<usize, CamError>;
}

/// Collects a whole converted image through the chunked encoder. Used by
/// the stream responder, which needs the converted bytes before it can
/// write the part header carrying their exact length.
pub fn encode_to_vec(
    sensor: &dyn ImageSensor,
    frame: &FrameBuffer,
    quality: u8,
) -> Result<Bytes, CamError> {
    let mut out = Vec::with_capacity(frame.len());
    sensor.encode_jpeg(frame, quality, &mut |chunk| {
        out.extend_from_slice(chunk);
        true
    })?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_dims() {
        assert_eq!(FrameSize::Svga.dims(), (800, 600));
        assert_eq!(FrameSize::Uxga.dims(), (1600, 1200));
    }

    #[test]
    fn test_unknown_model_is_unsupported() {
        let err = CameraModel::parse("ov9999-devkit").unwrap_err();
        assert_eq!(err.code(), "unsupported_configuration");
    }

    #[test]
    fn test_release_hook_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let released = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&released);
        let frame = FrameBuffer::new(Bytes::from_static(b"x"), PixelFormat::Jpeg, 1, 1)
            .with_release(move || {
                hook.fetch_add(1, Ordering::SeqCst);
            });
        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_data_clone_outlives_release_hook() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let released = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&released);
        let frame = FrameBuffer::new(Bytes::from_static(b"payload"), PixelFormat::Jpeg, 1, 1)
            .with_release(move || {
                hook.fetch_add(1, Ordering::SeqCst);
            });
        let data = frame.data().clone();
        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(&data[..], b"payload");
    }
}
