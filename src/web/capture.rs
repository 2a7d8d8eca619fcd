//! One-shot capture responder.
//!
//! A sensor already in JPEG format replies with the raw frame bytes in a
//! single body. Any other pixel format is converted on the fly and sent
//! with chunked transfer encoding, each encoder callback becoming one
//! chunk.

use super::AppState;
use crate::error::CamError;
use crate::sensor::PixelFormat;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

pub async fn handler(State(state): State<Arc<AppState>>) -> Response {
    let wait = Duration::from_millis(state.config.server.stream_lock_timeout_ms);
    let permit = match state.gate.acquire(Some(wait)).await {
        Ok(permit) => permit,
        Err(err) => return failure(StatusCode::SERVICE_UNAVAILABLE, err),
    };

    let frame = match state.sensor.acquire_frame() {
        Ok(frame) => frame,
        Err(err) => return failure(StatusCode::INTERNAL_SERVER_ERROR, err),
    };

    if frame.format() == PixelFormat::Jpeg {
        let body = frame.data().clone();
        drop(frame);
        drop(permit);
        return (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CONTENT_DISPOSITION, "inline"),
            ],
            body,
        )
            .into_response();
    }

    // Conversion runs on a blocking thread; the permit and the borrowed
    // frame ride along and are released when the encoder finishes.
    let (tx, mut rx) = mpsc::channel::<Bytes>(8);
    let sensor = Arc::clone(&state.sensor);
    let quality = state.config.camera.jpeg_quality;
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let result = sensor.encode_jpeg(&frame, quality, &mut |chunk| {
            tx.blocking_send(Bytes::copy_from_slice(chunk)).is_ok()
        });
        if let Err(err) = result {
            warn!(error = %err, "capture conversion failed mid-transfer");
        }
    });

    let chunks =
        futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).map(Ok::<Bytes, Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CONTENT_DISPOSITION, "inline")
        .body(Body::from_stream(chunks))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn failure(status: StatusCode, err: CamError) -> Response {
    warn!(error = %err, "capture request failed");
    (status, err.to_string()).into_response()
}
