//! Loopback listener that captures the consent redirect.
//!
//! Serves the registered callback path until one authorization code (or a
//! denial) has been handed to the client's [`ConsentHandle`], then stops.

mod config;
mod http;

use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use axum::{Router, routing::get};
use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{ConsentHandle, OAuthError};

pub use config::LocalServerConfig;
use http::{LocalServerState, callback_handler, fallback_handler, finish};

#[derive(Debug, Clone)]
pub struct LocalServer {
    config: Arc<LocalServerConfig>,
}

impl LocalServer {
    pub fn new(redirect_uri: &str) -> Result<Self, OAuthError> {
        Ok(Self::from_config(LocalServerConfig::from_redirect_uri(
            redirect_uri,
        )?))
    }

    pub fn from_config(config: LocalServerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &LocalServerConfig {
        &self.config
    }

    pub fn bind(&self) -> Result<TcpListener, OAuthError> {
        let addrs = self.config.socket_addrs()?;
        Ok(TcpListener::bind(&addrs[..])?)
    }

    /// Binds now, serves in the background. Binding first means the browser
    /// cannot reach the callback before the listener exists.
    pub fn spawn(&self, handle: ConsentHandle) -> Result<JoinHandle<()>, OAuthError> {
        let listener = self.bind()?;
        let server = self.clone();
        Ok(tokio::spawn(async move {
            if let Err(error) = server.serve(listener, handle).await {
                warn!(%error, "local callback server stopped");
            }
        }))
    }

    pub async fn serve(&self, listener: TcpListener, handle: ConsentHandle) -> Result<(), OAuthError> {
        let (done_tx, done_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));

        let state = LocalServerState {
            config: Arc::clone(&self.config),
            handle: handle.clone(),
            done_tx: Arc::clone(&done_tx),
        };

        let app = Router::new()
            .route(self.config.path(), get(callback_handler))
            .fallback(fallback_handler)
            .with_state(state);

        listener.set_nonblocking(true)?;
        let listener = TokioTcpListener::from_std(listener)?;
        info!(redirect_uri = %self.config.redirect_uri(), "waiting for consent redirect");

        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        let done_for_server = Arc::clone(&done_tx);
        let server_handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                let error = OAuthError::InvalidResponse {
                    message: err.to_string(),
                    body: String::new(),
                };
                finish(&done_for_server, Err(error));
            }
        });

        let result = match self.config.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, done_rx).await {
                Ok(result) => result,
                Err(_) => {
                    let _ = handle.reject(OAuthError::LocalServerTimeout { timeout });
                    Ok(Err(OAuthError::LocalServerTimeout { timeout }))
                }
            },
            None => done_rx.await,
        };

        let _ = shutdown_tx.send(());
        let _ = server_handle.await;

        result.map_err(|_| OAuthError::InvalidResponse {
            message: "local server completion channel closed".to_string(),
            body: String::new(),
        })?
    }
}
