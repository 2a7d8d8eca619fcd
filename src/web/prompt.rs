//! Remote command prompt.
//!
//! Commands arrive as a query string on a GET request:
//!
//! - `mf=oneshot[&fs={sd|mmc}][&filename=<NAME>]`
//! - `mf=timershot[&fs={sd|mmc}][&filename=<PREFIX>][&period=<SECONDS>]`
//! - `mf=distimer` / `mf=entimer`
//! - `mf=load` / `mf=save`
//!
//! Success replies 202 Accepted; any failure, including a malformed query,
//! replies 400 with the error code as the body.

use super::AppState;
use crate::error::CamError;
use crate::settings;
use crate::storage::StorageMedium;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct PromptParams {
    mf: Option<String>,
    fs: Option<String>,
    filename: Option<String>,
    period: Option<String>,
}

pub async fn handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PromptParams>,
) -> Response {
    match dispatch(&state, &params).await {
        Ok(()) => (StatusCode::ACCEPTED, "OK").into_response(),
        Err(err) => {
            warn!(params = ?params, error = %err, "prompt command rejected");
            (StatusCode::BAD_REQUEST, err.code()).into_response()
        }
    }
}

async fn dispatch(state: &AppState, params: &PromptParams) -> Result<(), CamError> {
    match params.mf.as_deref().unwrap_or("") {
        "oneshot" => {
            let medium = select_medium(state, params.fs.as_deref())?;
            let file = state
                .exporter
                .one_shot(medium.as_ref(), params.filename.as_deref())
                .await?;
            info!(file = %file, "one-shot export complete");
            Ok(())
        }
        "timershot" => {
            let medium = select_medium(state, params.fs.as_deref())?;
            let period = parse_period(params.period.as_deref())?;
            state
                .periodic
                .start(period, medium, params.filename.as_deref())
                .await
        }
        "distimer" => {
            state.periodic.pause().await;
            Ok(())
        }
        "entimer" => state.periodic.resume().await,
        "load" => {
            settings::restore(
                state.settings.as_ref(),
                &state.config.export.settings_key,
                &state.gate,
                state.sensor.as_ref(),
            )
            .await
        }
        "save" => {
            settings::persist(
                state.settings.as_ref(),
                &state.config.export.settings_key,
                &state.gate,
                state.sensor.as_ref(),
            )
            .await
        }
        "" => Err(CamError::BadCommand("missing mf operand".to_string())),
        other => Err(CamError::BadCommand(format!(
            "unknown member function {:?}",
            other
        ))),
    }
}

/// Medium selection; an absent or empty `fs` operand means the built-in
/// MMC slot.
fn select_medium(state: &AppState, fs: Option<&str>) -> Result<Arc<dyn StorageMedium>, CamError> {
    match fs.unwrap_or("") {
        "" | "mmc" => Ok(Arc::clone(&state.mmc)),
        "sd" => Ok(Arc::clone(&state.sd)),
        other => Err(CamError::BadCommand(format!(
            "unknown filesystem {:?}",
            other
        ))),
    }
}

/// Period operand in whole seconds. Absent means zero, which leaves any
/// running periodic job untouched; a non-numeric value is rejected rather
/// than silently read as zero.
fn parse_period(period: Option<&str>) -> Result<Duration, CamError> {
    match period {
        None | Some("") => Ok(Duration::ZERO),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| CamError::BadCommand(format!("invalid period {:?}", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::testutil::rig;

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period(None).unwrap(), Duration::ZERO);
        assert_eq!(parse_period(Some("")).unwrap(), Duration::ZERO);
        assert_eq!(parse_period(Some("30")).unwrap(), Duration::from_secs(30));
        assert!(parse_period(Some("soon")).is_err());
        assert!(parse_period(Some("-1")).is_err());
    }

    #[test]
    fn test_medium_selection() {
        let rig = rig();
        for fs in [None, Some("")] {
            let medium = select_medium(&rig.state, fs).unwrap();
            assert_eq!(medium.kind(), crate::storage::MediumKind::Mmc);
        }
        let sd = select_medium(&rig.state, Some("sd")).unwrap();
        assert_eq!(sd.kind(), crate::storage::MediumKind::Sd);
        assert!(select_medium(&rig.state, Some("flash")).is_err());
    }

    #[tokio::test]
    async fn test_save_then_load_applies_to_sensor() {
        let rig = rig();
        let params = PromptParams {
            mf: Some("save".to_string()),
            fs: None,
            filename: None,
            period: None,
        };
        dispatch(&rig.state, &params).await.unwrap();

        let params = PromptParams {
            mf: Some("load".to_string()),
            fs: None,
            filename: None,
            period: None,
        };
        dispatch(&rig.state, &params).await.unwrap();
        assert_eq!(rig.sensor.applied_count(), 1);
    }

    #[tokio::test]
    async fn test_load_without_saved_settings_fails() {
        let rig = rig();
        let params = PromptParams {
            mf: Some("load".to_string()),
            fs: None,
            filename: None,
            period: None,
        };
        let err = dispatch(&rig.state, &params).await.unwrap_err();
        assert_eq!(err.code(), "persist_failed");
    }
}
