// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Server-directed live sampling of payloads flowing through a specific
//! audience (spec §4.G).
//!
//! Each tail has a bounded queue (capacity 100) and a `sample_rate` in
//! `(0, 1]`; the processor enqueues pre/post-process samples without
//! blocking, a per-publish draw skips samples outside the rate, a
//! dedicated task drains the queue to the control plane over a
//! client-streaming RPC, and queue overflow drops the newest sample and
//! bumps a `tail_dropped` counter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Request;

use crate::audience::encode;
use crate::proto::internal_client::InternalClient;
use crate::proto::{Audience, TailResponse, TailType};
use crate::telemetry::TelemetryClient;

/// Queue capacity per active tail (spec §4.G).
const TAIL_QUEUE_CAPACITY: usize = 100;

struct TailHandle {
    sender: mpsc::Sender<TailResponse>,
    cancel: CancellationToken,
    /// Fraction of matching payloads actually shipped, in `(0, 1]`
    /// (spec §3/§4.G's `Tail` data model).
    sample_rate: f32,
    started_at: SystemTime,
}

/// Starts/stops per-audience tail workers and routes processor-side
/// samples to the correct queue.
pub struct TailController {
    stub: InternalClient<Channel>,
    auth_token: String,
    session_id: String,
    metrics: Arc<TelemetryClient>,
    tails: RwLock<HashMap<String, Arc<TailHandle>>>,
    by_audience: RwLock<HashMap<String, Vec<String>>>,
}

impl TailController {
    pub fn new(
        stub: InternalClient<Channel>,
        auth_token: String,
        session_id: String,
        metrics: Arc<TelemetryClient>,
    ) -> Self {
        Self {
            stub,
            auth_token,
            session_id,
            metrics,
            tails: RwLock::new(HashMap::new()),
            by_audience: RwLock::new(HashMap::new()),
        }
    }

    /// Start a tail worker for `tail_id` against `audience`, sampling
    /// matching payloads at `sample_rate` (spec §3/§4.G). Replaces any
    /// prior worker registered under the same id.
    pub async fn start(&self, tail_id: &str, audience: &Audience, sample_rate: f32) {
        self.stop(tail_id).await;

        let (tx, rx) = mpsc::channel(TAIL_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();

        let handle = Arc::new(TailHandle {
            sender: tx,
            cancel: cancel.clone(),
            sample_rate,
            started_at: SystemTime::now(),
        });

        self.tails
            .write()
            .await
            .insert(tail_id.to_string(), handle);

        self.by_audience
            .write()
            .await
            .entry(encode(audience))
            .or_default()
            .push(tail_id.to_string());

        let mut stub = self.stub.clone();
        let auth_token = self.auth_token.clone();
        tokio::spawn(async move {
            let outbound = tokio_stream::wrappers::ReceiverStream::new(rx);
            let mut request = Request::new(outbound);
            request
                .metadata_mut()
                .insert("auth-token", auth_token.parse().unwrap());

            tokio::select! {
                result = stub.send_tail(request) => {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "tail stream ended with error");
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    /// Stop the tail worker for `tail_id`, if any.
    pub async fn stop(&self, tail_id: &str) {
        if let Some(handle) = self.tails.write().await.remove(tail_id) {
            handle.cancel.cancel();
        }
        for ids in self.by_audience.write().await.values_mut() {
            ids.retain(|id| id != tail_id);
        }
    }

    /// Stop every active tail worker. Called on client shutdown.
    pub async fn stop_all(&self) {
        for (_, handle) in self.tails.write().await.drain() {
            handle.cancel.cancel();
        }
        self.by_audience.write().await.clear();
    }

    /// Publish a sample for every tail registered against `audience`,
    /// if any. Enqueueing never blocks the caller: a full queue drops
    /// the newest sample and increments `tail_dropped` instead (spec
    /// §4.G).
    pub async fn publish(&self, audience: &Audience, kind: TailType, original: &[u8], new: &[u8]) {
        let key = encode(audience);
        let ids = match self.by_audience.read().await.get(&key) {
            Some(ids) if !ids.is_empty() => ids.clone(),
            _ => return,
        };

        let tails = self.tails.read().await;
        for tail_id in ids {
            let Some(handle) = tails.get(&tail_id) else {
                continue;
            };

            if !should_sample(handle.sample_rate, rand::rng().random::<f32>()) {
                continue;
            }

            let timestamp_ns = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);

            let sample = TailResponse {
                tail_id: tail_id.clone(),
                session_id: self.session_id.clone(),
                r#type: kind as i32,
                timestamp_ns,
                original_data: original.to_vec(),
                new_data: new.to_vec(),
            };

            if handle.sender.try_send(sample).is_err() {
                self.metrics
                    .incr("tail_dropped", &[("tail_id", tail_id.as_str())], 1.0)
                    .await;
            }
        }
    }

    /// When `tail_id` was started, if it's still registered (spec §3's
    /// `Tail` data model).
    pub async fn started_at(&self, tail_id: &str) -> Option<SystemTime> {
        self.tails.read().await.get(tail_id).map(|h| h.started_at)
    }

    /// Whether any tail is currently registered for `audience`. Lets
    /// the processor skip building samples entirely when nothing is
    /// watching.
    pub async fn has_tail(&self, audience: &Audience) -> bool {
        let key = encode(audience);
        self.by_audience
            .read()
            .await
            .get(&key)
            .map(|ids| !ids.is_empty())
            .unwrap_or(false)
    }
}

/// Whether a single publish draw falls within `sample_rate`. A rate of
/// `1.0` always samples regardless of the draw, avoiding float-equality
/// surprises at the boundary.
fn should_sample(sample_rate: f32, draw: f32) -> bool {
    sample_rate >= 1.0 || draw < sample_rate
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::transport::Endpoint;

    fn test_controller() -> TailController {
        let channel = Endpoint::from_static("http://localhost:9090").connect_lazy();
        let stub = InternalClient::new(channel);
        let metrics = Arc::new(TelemetryClient::new(stub.clone(), "token".to_string()));
        TailController::new(stub, "token".to_string(), "session".to_string(), metrics)
    }

    fn aud() -> Audience {
        Audience {
            service_name: "testing".to_string(),
            component_name: "kafka".to_string(),
            operation_name: "test-topic".to_string(),
            operation_type: 1,
        }
    }

    #[tokio::test]
    async fn started_at_is_recorded_while_registered() {
        let controller = test_controller();
        controller.start("t1", &aud(), 1.0).await;
        assert!(controller.started_at("t1").await.is_some());

        controller.stop("t1").await;
        assert!(controller.started_at("t1").await.is_none());
    }

    #[tokio::test]
    async fn has_tail_reflects_registration_index() {
        // Exercises only the audience index bookkeeping, without
        // spinning up a real gRPC stream.
        let index: RwLock<HashMap<String, Vec<String>>> = RwLock::new(HashMap::new());
        let key = "svc.comp.2.op".to_string();
        index
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .push("t1".to_string());

        assert!(index
            .read()
            .await
            .get(&key)
            .map(|ids| !ids.is_empty())
            .unwrap_or(false));
    }

    #[test]
    fn should_sample_gates_on_rate() {
        assert!(should_sample(1.0, 0.999));
        assert!(should_sample(0.5, 0.1));
        assert!(!should_sample(0.5, 0.9));
        assert!(!should_sample(0.01, 0.5));
    }
}
