// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The public facade: wires the registry, WASM bridge, telemetry, tail
//! controller, and session manager together behind a single handle.

use std::sync::Arc;
use uuid::Uuid;

use crate::config::StreamdalConfig;
use crate::error::{ConfigError, SessionError};
use crate::processor::PayloadProcessor;
use crate::proto::internal_client::InternalClient;
use crate::registry::PipelineRegistry;
use crate::session::SessionManager;
use crate::tail::TailController;
use crate::telemetry::TelemetryClient;
use crate::types::{ProcessRequest, ProcessResponse};
use crate::wasm::WasmBridge;

/// Errors that can occur while constructing a [`StreamdalClient`].
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// The entry point applications embed. One instance per service
/// process; cheap to clone (every field is an `Arc`).
#[derive(Clone)]
pub struct StreamdalClient {
    processor: Arc<PayloadProcessor>,
    wasm: Arc<WasmBridge>,
    tail: Arc<TailController>,
    session: Arc<SessionManager>,
}

impl StreamdalClient {
    /// Validate `cfg`, connect and register with the control plane, and
    /// spawn the background tasks (command consumer, heartbeat, metrics
    /// flusher). Fails only if construction-time validation or the
    /// initial registration attempt fails; later disconnects are
    /// retried transparently (spec §4.F, §7).
    pub async fn new(cfg: StreamdalConfig) -> Result<Self, ClientError> {
        cfg.validate()?;
        let cfg = Arc::new(cfg);
        let session_id = Uuid::new_v4().to_string();

        let registry = Arc::new(PipelineRegistry::new());
        let wasm = Arc::new(WasmBridge::new());

        let uri = format!("http://{}:{}", cfg.grpc_url, cfg.grpc_port);
        let channel = tonic::transport::Endpoint::from_shared(uri)
            .map_err(SessionError::Connect)?
            .timeout(cfg.grpc_timeout)
            .connect()
            .await
            .map_err(SessionError::Connect)?;
        let stub = InternalClient::new(channel);

        let metrics = Arc::new(TelemetryClient::new(stub.clone(), cfg.grpc_token.clone()));
        let tail = Arc::new(TailController::new(
            stub,
            cfg.grpc_token.clone(),
            session_id.clone(),
            metrics.clone(),
        ));

        let processor = Arc::new(PayloadProcessor::new(
            cfg.clone(),
            registry.clone(),
            wasm.clone(),
            metrics.clone(),
            tail.clone(),
        ));

        let session = Arc::new(
            SessionManager::connect(cfg, session_id, registry, tail.clone(), metrics).await?,
        );

        Ok(Self {
            processor,
            wasm,
            tail,
            session,
        })
    }

    /// Run `req` through every active pipeline attached to its
    /// audience. Never fails: failures are reported through
    /// `ProcessResponse.error` (spec §7).
    pub async fn process(&self, req: ProcessRequest) -> ProcessResponse {
        self.processor.process(Some(req)).await
    }

    /// Cooperatively shut down: stop all tail workers, signal the
    /// session's background tasks to exit, and release the cached WASM
    /// instances. In-flight `process` calls complete normally (spec
    /// §4.F).
    pub async fn close(&self) {
        self.session.close(&self.tail).await;
        self.wasm.release_all().await;
    }
}
