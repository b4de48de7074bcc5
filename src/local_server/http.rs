use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse},
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{AuthorizationResponse, ConsentHandle, OAuthError};

use super::config::LocalServerConfig;

const SUCCESS_PAGE: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8" /><title>Spark authorization complete</title></head>
  <body>
    <p>Authorization complete. You may close this window.</p>
  </body>
</html>
"#;

const ERROR_PAGE: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8" /><title>Spark authorization error</title></head>
  <body>
    <p>Authorization failed. You may close this window and try again.</p>
  </body>
</html>
"#;

type DoneResult = Result<(), OAuthError>;
pub(super) type SharedDoneSender = Arc<Mutex<Option<oneshot::Sender<DoneResult>>>>;

#[derive(Clone)]
pub(super) struct LocalServerState {
    pub(super) config: Arc<LocalServerConfig>,
    pub(super) handle: ConsentHandle,
    pub(super) done_tx: SharedDoneSender,
}

pub(super) fn finish(done_tx: &SharedDoneSender, result: DoneResult) {
    let sender = done_tx
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(result);
    }
}

pub(super) async fn callback_handler(
    State(state): State<LocalServerState>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let LocalServerState {
        config,
        handle,
        done_tx,
    } = state;

    let callback_url = config.callback_url(&query.unwrap_or_default());

    match AuthorizationResponse::from_url(&callback_url) {
        Ok(response) => match handle.deliver_code(response.code) {
            Ok(()) => {
                debug!("authorization code delivered");
                finish(&done_tx, Ok(()));
                (StatusCode::OK, Html(SUCCESS_PAGE))
            }
            Err(error) => {
                warn!(%error, "authorization code arrived with no consent waiting");
                finish(&done_tx, Err(error));
                (StatusCode::GONE, Html(ERROR_PAGE))
            }
        },
        Err(OAuthError::MissingAuthorizationCode) => {
            (StatusCode::BAD_REQUEST, Html(ERROR_PAGE))
        }
        Err(denied @ OAuthError::ConsentDenied { .. }) => {
            warn!(error = %denied, "consent denied");
            let _ = handle.reject(denied);
            finish(&done_tx, Ok(()));
            (StatusCode::OK, Html(ERROR_PAGE))
        }
        Err(error) => {
            finish(&done_tx, Err(error));
            (StatusCode::INTERNAL_SERVER_ERROR, Html(ERROR_PAGE))
        }
    }
}

pub(super) async fn fallback_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Html(ERROR_PAGE))
}
