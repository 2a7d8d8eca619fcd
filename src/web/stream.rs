//! Motion-JPEG stream responder.
//!
//! The reply is a `multipart/x-mixed-replace` body that never ends on its
//! own: a pump task captures frames and pushes ready-framed parts into a
//! channel the response body drains. The sensor gate is held only for the
//! span of each part send, bounded, so an exclusive sensor owner delays a
//! part instead of wedging the connection; a timed-out wait skips that
//! frame and the stream carries on.

use super::AppState;
use crate::sensor::{encode_to_vec, PixelFormat};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// RFC 2046 bchars, minus the space.
const BOUNDARY_CHARS: &[u8] =
    b"'()+,-./0123456789:=?abcdefghijklmnopqrstuvwxyz_ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const BOUNDARY_LEN: usize = 32;

pub async fn handler(State(state): State<Arc<AppState>>) -> Response {
    let boundary = random_boundary();
    let content_type = format!("multipart/x-mixed-replace;boundary={}", boundary);
    let framerate = state.config.server.framerate_hint.to_string();

    let (tx, mut rx) = mpsc::channel::<Bytes>(4);
    tokio::spawn(pump(state, boundary, tx));

    let parts =
        futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).map(Ok::<Bytes, Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header("X-Framerate", framerate)
        .body(Body::from_stream(parts))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Per-connection frame pump. Ends when the client hangs up or the sensor
/// fails; a busy gate only skips frames.
async fn pump(state: Arc<AppState>, boundary: String, tx: mpsc::Sender<Bytes>) {
    let wait = Duration::from_millis(state.config.server.stream_lock_timeout_ms);
    let quality = state.config.camera.jpeg_quality;

    loop {
        let frame = match state.sensor.acquire_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "stream ended on frame acquisition failure");
                let _ = tx.send(diagnostic(&boundary, &err.to_string())).await;
                return;
            }
        };

        let payload = if frame.format() == PixelFormat::Jpeg {
            let bytes = frame.data().clone();
            drop(frame);
            bytes
        } else {
            let converted = encode_to_vec(state.sensor.as_ref(), &frame, quality);
            drop(frame);
            match converted {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(error = %err, "stream ended on conversion failure");
                    let _ = tx.send(diagnostic(&boundary, &err.to_string())).await;
                    return;
                }
            }
        };

        let permit = match state.gate.acquire(Some(wait)).await {
            Ok(permit) => permit,
            Err(_) => continue,
        };
        let part_header = Bytes::from(format!(
            "\r\n--{}\r\nContent-Type:image/jpeg\r\nContent-Length:{}\r\n\r\n",
            boundary,
            payload.len()
        ));
        let sent = tx.send(part_header).await.is_ok() && tx.send(payload).await.is_ok();
        drop(permit);

        if !sent {
            debug!("stream client disconnected");
            return;
        }
    }
}

/// Final part carrying a plain-text failure description; the connection
/// closes right after it.
fn diagnostic(boundary: &str, message: &str) -> Bytes {
    Bytes::from(format!(
        "\r\n--{}\r\nContent-Type:text/plain\r\nContent-Length:{}\r\n\r\n{}",
        boundary,
        message.len(),
        message
    ))
}

fn random_boundary() -> String {
    let mut rng = ChaCha8Rng::from_entropy();
    (0..BOUNDARY_LEN)
        .map(|_| BOUNDARY_CHARS[rng.next_u32() as usize % BOUNDARY_CHARS.len()] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::mock::MockSensor;
    use crate::web::testutil::{rig, rig_with_sensor};
    use tokio::time::timeout;

    #[test]
    fn test_boundary_shape() {
        let a = random_boundary();
        let b = random_boundary();
        assert_eq!(a.len(), BOUNDARY_LEN);
        assert!(a.bytes().all(|c| BOUNDARY_CHARS.contains(&c)));
        assert!(!a.contains(' '));
        assert_ne!(a, b);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pump_frames_are_well_formed_parts() {
        let rig = rig();
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(pump(Arc::clone(&rig.state), "bnd".to_string(), tx));

        let header = rx.recv().await.unwrap();
        let header = String::from_utf8(header.to_vec()).unwrap();
        assert!(header.starts_with("\r\n--bnd\r\n"));
        assert!(header.contains("Content-Type:image/jpeg\r\n"));

        let payload = rx.recv().await.unwrap();
        let expected = format!("Content-Length:{}\r\n\r\n", payload.len());
        assert!(header.ends_with(&expected), "header was {:?}", header);
        assert!(payload.starts_with(&[0xFF, 0xD8]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pump_stops_when_client_hangs_up() {
        let rig = rig();
        let (tx, rx) = mpsc::channel(1);
        let pump_task = tokio::spawn(pump(Arc::clone(&rig.state), "bnd".to_string(), tx));
        drop(rx);
        timeout(Duration::from_secs(1), pump_task)
            .await
            .expect("pump should terminate")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pump_skips_parts_while_gate_is_held() {
        let rig = rig();
        let held = rig.state.gate.acquire(None).await.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(pump(Arc::clone(&rig.state), "bnd".to_string(), tx));

        // Short gate timeout in the test config; nothing may arrive while
        // another owner holds the sensor.
        let blocked = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(blocked.is_err(), "part sent despite held gate");

        drop(held);
        let part = timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(part.is_ok_and(|p| p.is_some()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pump_ends_with_diagnostic_on_sensor_failure() {
        let rig = rig();
        rig.sensor.set_fail_acquire(true);
        let (tx, mut rx) = mpsc::channel(16);
        let pump_task = tokio::spawn(pump(Arc::clone(&rig.state), "bnd".to_string(), tx));
        pump_task.await.unwrap();

        let mut last = None;
        while let Some(part) = rx.recv().await {
            last = Some(part);
        }
        let last = String::from_utf8(last.unwrap().to_vec()).unwrap();
        assert!(last.contains("Content-Type:text/plain"), "got {:?}", last);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pump_ends_with_diagnostic_on_conversion_failure() {
        let sensor = Arc::new(MockSensor::raw());
        sensor.set_fail_encode(true);
        let rig = rig_with_sensor(Arc::clone(&sensor));

        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(pump(Arc::clone(&rig.state), "bnd".to_string(), tx))
            .await
            .unwrap();

        let mut last = None;
        while let Some(part) = rx.recv().await {
            last = Some(part);
        }
        let last = String::from_utf8(last.unwrap().to_vec()).unwrap();
        assert!(last.contains("Content-Type:text/plain"), "got {:?}", last);
        assert!(last.contains("encoding failed"), "got {:?}", last);
        // The raw frame was dropped before the diagnostic went out.
        assert_eq!(sensor.outstanding(), 0);
    }
}
