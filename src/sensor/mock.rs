//! Instrumented sensor used by tests: counts outstanding frame borrows and
//! injects acquisition/encoding failures.

use super::{FrameBuffer, ImageSensor, PixelFormat, SensorStatus};
use crate::error::CamError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct MockSensor {
    payload: Bytes,
    format: Mutex<PixelFormat>,
    status: Mutex<SensorStatus>,
    outstanding: Arc<AtomicUsize>,
    acquired_total: AtomicUsize,
    applied: AtomicUsize,
    fail_acquire: AtomicBool,
    fail_encode: AtomicBool,
}

impl MockSensor {
    pub fn new(payload: &[u8], format: PixelFormat) -> Self {
        Self {
            payload: Bytes::copy_from_slice(payload),
            format: Mutex::new(format),
            status: Mutex::new(SensorStatus::default()),
            outstanding: Arc::new(AtomicUsize::new(0)),
            acquired_total: AtomicUsize::new(0),
            applied: AtomicUsize::new(0),
            fail_acquire: AtomicBool::new(false),
            fail_encode: AtomicBool::new(false),
        }
    }

    pub fn jpeg() -> Self {
        Self::new(b"\xFF\xD8mock-jpeg-frame\xFF\xD9", PixelFormat::Jpeg)
    }

    pub fn raw() -> Self {
        Self::new(b"raw-pixel-data", PixelFormat::Rgb565)
    }

    pub fn set_fail_acquire(&self, fail: bool) {
        self.fail_acquire.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_encode(&self, fail: bool) {
        self.fail_encode.store(fail, Ordering::SeqCst);
    }

    /// Frames currently borrowed and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Total successful acquisitions.
    pub fn acquired_total(&self) -> usize {
        self.acquired_total.load(Ordering::SeqCst)
    }

    /// Times a full status record was applied.
    pub fn applied_count(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }
}

impl ImageSensor for MockSensor {
    fn acquire_frame(&self) -> Result<FrameBuffer, CamError> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(CamError::ResourceUnavailable(
                "mock frame acquisition failure".to_string(),
            ));
        }
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.acquired_total.fetch_add(1, Ordering::SeqCst);
        let outstanding = Arc::clone(&self.outstanding);
        Ok(
            FrameBuffer::new(self.payload.clone(), *self.format.lock(), 320, 240)
                .with_release(move || {
                    outstanding.fetch_sub(1, Ordering::SeqCst);
                }),
        )
    }

    fn status(&self) -> Result<SensorStatus, CamError> {
        Ok(self.status.lock().clone())
    }

    fn apply_status(&self, status: &SensorStatus) -> Result<(), CamError> {
        *self.status.lock() = status.clone();
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_pixel_format(&self, format: PixelFormat) -> Result<(), CamError> {
        *self.format.lock() = format;
        Ok(())
    }

    fn set_frame_size(&self, size: super::FrameSize) -> Result<(), CamError> {
        self.status.lock().frame_size = size;
        Ok(())
    }

    fn encode_jpeg(
        &self,
        frame: &FrameBuffer,
        _quality: u8,
        sink: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<usize, CamError> {
        if self.fail_encode.load(Ordering::SeqCst) {
            return Err(CamError::EncodingFailed(
                "mock conversion failure".to_string(),
            ));
        }
        let mut written = 0;
        for chunk in frame.data().chunks(4) {
            if !sink(chunk) {
                return Err(CamError::EncodingFailed("sink rejected output".to_string()));
            }
            written += chunk.len();
        }
        Ok(written)
    }
}
