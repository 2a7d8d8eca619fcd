//! Synthetic sensor backend producing a canned test frame.
//!
//! The hardware driver lives outside this crate; the pattern sensor stands
//! in for it so the server can run end to end on any host.

use super::{CameraModel, FrameBuffer, FrameSize, ImageSensor, PixelFormat, SensorStatus};
use crate::error::CamError;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::info;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const ENCODE_CHUNK: usize = 4096;

pub struct PatternSensor {
    model: CameraModel,
    status: Mutex<SensorStatus>,
    format: Mutex<PixelFormat>,
}

impl PatternSensor {
    /// Detects and configures the sensor. Unknown models have already been
    /// rejected by [`CameraModel::parse`]; init itself cannot fail for the
    /// synthetic backend.
    pub fn init(model: CameraModel, frame_size: FrameSize) -> Result<Self, CamError> {
        info!(?model, ?frame_size, "pattern sensor initialized");
        let status = SensorStatus {
            frame_size,
            ..SensorStatus::default()
        };
        Ok(Self {
            model,
            status: Mutex::new(status),
            format: Mutex::new(PixelFormat::Jpeg),
        })
    }

    pub fn model(&self) -> CameraModel {
        self.model
    }

    /// A gradient payload bracketed by JPEG markers, sized to stay small.
    fn render_frame(&self, width: u32, height: u32) -> Bytes {
        let rows = (height / 8).max(1) as usize;
        let cols = (width / 8).max(1) as usize;
        let mut data = Vec::with_capacity(rows * cols + 4);
        data.extend_from_slice(&JPEG_SOI);
        for row in 0..rows {
            for col in 0..cols {
                data.push(((row * 31 + col * 7) & 0xFF) as u8);
            }
        }
        data.extend_from_slice(&JPEG_EOI);
        Bytes::from(data)
    }
}

impl ImageSensor for PatternSensor {
    fn acquire_frame(&self) -> Result<FrameBuffer, CamError> {
        let (format, (width, height)) = {
            let status = self.status.lock();
            (*self.format.lock(), status.frame_size.dims())
        };
        let data = self.render_frame(width, height);
        Ok(FrameBuffer::new(data, format, width, height))
    }

    fn status(&self) -> Result<SensorStatus, CamError> {
        Ok(self.status.lock().clone())
    }

    fn apply_status(&self, status: &SensorStatus) -> Result<(), CamError> {
        if status.quality == 0 || status.quality > 100 {
            return Err(CamError::UnsupportedConfiguration(format!(
                "quality {} out of range",
                status.quality
            )));
        }
        *self.status.lock() = status.clone();
        Ok(())
    }

    fn set_pixel_format(&self, format: PixelFormat) -> Result<(), CamError> {
        *self.format.lock() = format;
        Ok(())
    }

    fn set_frame_size(&self, size: FrameSize) -> Result<(), CamError> {
        self.status.lock().frame_size = size;
        Ok(())
    }

    fn encode_jpeg(
        &self,
        frame: &FrameBuffer,
        _quality: u8,
        sink: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<usize, CamError> {
        let mut written = 0;
        if !sink(&JPEG_SOI) {
            return Err(CamError::EncodingFailed("sink rejected output".to_string()));
        }
        written += JPEG_SOI.len();
        for chunk in frame.data().chunks(ENCODE_CHUNK) {
            if !sink(chunk) {
                return Err(CamError::EncodingFailed("sink rejected output".to_string()));
            }
            written += chunk.len();
        }
        if !sink(&JPEG_EOI) {
            return Err(CamError::EncodingFailed("sink rejected output".to_string()));
        }
        written += JPEG_EOI.len();
        Ok(written)
    }
}
