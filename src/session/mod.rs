// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The session manager: registration handshake, heartbeat loop,
//! command-stream consumption with reconnection, and cooperative
//! shutdown (spec §4.F).

pub mod dispatcher;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::config::StreamdalConfig;
use crate::error::SessionError;
use crate::proto::internal_client::InternalClient;
use crate::proto::{ClientInfo, ClientType as WireClientType, HeartbeatRequest, RegisterRequest};
use crate::registry::PipelineRegistry;
use crate::session::dispatcher::Dispatcher;
use crate::tail::TailController;
use crate::telemetry::TelemetryClient;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const METRICS_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Owns the three long-lived background tasks (command consumer,
/// heartbeat, metrics flusher) and the shared exit signal (spec §5).
pub struct SessionManager {
    cancel: CancellationToken,
}

impl SessionManager {
    /// Connect, register, and spawn the background tasks. Returns once
    /// the first registration attempt either succeeds or fails; later
    /// disconnects are retried transparently and never surfaced (spec
    /// §4.F, §7).
    pub async fn connect(
        cfg: Arc<StreamdalConfig>,
        session_id: String,
        registry: Arc<PipelineRegistry>,
        tail: Arc<TailController>,
        metrics: Arc<TelemetryClient>,
    ) -> Result<Self, SessionError> {
        let channel = build_channel(&cfg).await?;
        let mut stub = InternalClient::new(channel);

        let stream = register(&mut stub, &cfg, &session_id).await?;

        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::new(
            cfg.service_name.clone(),
            registry,
            tail.clone(),
        ));

        tokio::spawn(command_loop(
            stub.clone(),
            cfg.clone(),
            session_id.clone(),
            dispatcher,
            stream,
            cancel.clone(),
        ));
        tokio::spawn(heartbeat_loop(
            stub.clone(),
            cfg.clone(),
            session_id.clone(),
            cancel.clone(),
        ));
        tokio::spawn(metrics_loop(metrics, cancel.clone()));

        Ok(Self { cancel })
    }

    /// Signal every background task to exit. Tail workers and the
    /// command/heartbeat loops observe this on their next wake and
    /// return; in-flight `process` calls are unaffected (spec §4.F).
    pub async fn close(&self, tail: &TailController) {
        self.cancel.cancel();
        tail.stop_all().await;
    }
}

async fn build_channel(cfg: &StreamdalConfig) -> Result<Channel, SessionError> {
    let uri = format!("http://{}:{}", cfg.grpc_url, cfg.grpc_port);
    Endpoint::from_shared(uri)
        .map_err(SessionError::Connect)?
        .timeout(cfg.grpc_timeout)
        .connect()
        .await
        .map_err(SessionError::Connect)
}

async fn register(
    stub: &mut InternalClient<Channel>,
    cfg: &StreamdalConfig,
    session_id: &str,
) -> Result<tonic::Streaming<crate::proto::Command>, SessionError> {
    let client_type = match cfg.client_type {
        crate::config::ClientType::Sdk => WireClientType::Sdk,
        crate::config::ClientType::Shim => WireClientType::Shim,
    };

    let mut request = Request::new(RegisterRequest {
        service_name: cfg.service_name.clone(),
        dry_run: cfg.dry_run,
        client_info: Some(ClientInfo {
            client_type: client_type as i32,
            library_name: "streamdal".to_string(),
            library_version: env!("CARGO_PKG_VERSION").to_string(),
            language: "rust".to_string(),
            arch: std::env::consts::ARCH.to_string(),
            os: std::env::consts::OS.to_string(),
        }),
        session_id: session_id.to_string(),
    });
    request
        .metadata_mut()
        .insert("auth-token", cfg.grpc_token.parse().unwrap());

    let response = stub
        .register(request)
        .await
        .map_err(SessionError::RegistrationFailed)?;

    Ok(response.into_inner())
}

/// Consume the registration stream, dispatching each command. On
/// stream end/error, reconnect with capped exponential backoff and
/// re-register, unless the exit signal has been set (spec §4.F).
async fn command_loop(
    mut stub: InternalClient<Channel>,
    cfg: Arc<StreamdalConfig>,
    session_id: String,
    dispatcher: Arc<Dispatcher>,
    mut stream: tonic::Streaming<crate::proto::Command>,
    cancel: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => match next {
                    Some(Ok(cmd)) => {
                        backoff = INITIAL_BACKOFF;
                        dispatcher.dispatch(cmd).await;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "command stream error, reconnecting");
                        break;
                    }
                    None => {
                        tracing::warn!("command stream closed, reconnecting");
                        break;
                    }
                },
            }
        }

        if cancel.is_cancelled() {
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(backoff) => {}
        }
        backoff = next_backoff(backoff);

        match register(&mut stub, &cfg, &session_id).await {
            Ok(new_stream) => stream = new_stream,
            Err(err) => {
                tracing::warn!(error = %err, "re-registration failed, will retry");
            }
        }
    }
}

async fn heartbeat_loop(
    mut stub: InternalClient<Channel>,
    cfg: Arc<StreamdalConfig>,
    session_id: String,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let mut request = Request::new(HeartbeatRequest {
                    service_name: cfg.service_name.clone(),
                    session_id: session_id.clone(),
                });
                request
                    .metadata_mut()
                    .insert("auth-token", cfg.grpc_token.parse().unwrap());

                if let Err(err) = stub.heartbeat(request).await {
                    tracing::warn!(error = %err, "heartbeat failed");
                }
            }
        }
    }
}

async fn metrics_loop(metrics: Arc<TelemetryClient>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(METRICS_FLUSH_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => metrics.flush_tick().await,
        }
    }
}

/// Double `current`, capped at [`MAX_BACKOFF`] (spec §4.F reconnection
/// policy).
fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    #[test]
    fn backoff_doubles_and_caps() {
        init_tracing();
        assert_eq!(next_backoff(INITIAL_BACKOFF), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(20)), Duration::from_secs(30));
        assert_eq!(next_backoff(MAX_BACKOFF), MAX_BACKOFF);
    }
}
