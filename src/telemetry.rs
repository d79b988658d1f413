// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Thin asynchronous metrics and notify emitters to the control plane
//! (spec §4.H).
//!
//! Counters are aggregated locally and flushed on a 1-second tick.
//! Flush failures are logged and the batch retained for the next tick,
//! up to ten accumulated batches; beyond that the oldest is dropped
//! (spec §4.H, §7).

use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;
use tonic::transport::Channel;
use tonic::Request;

use crate::proto::internal_client::InternalClient;
use crate::proto::{Audience, MetricCounter, MetricsRequest, NotifyRequest};

/// Cap on the number of accumulated, unflushed batches (spec §4.H).
const MAX_PENDING_BATCHES: usize = 10;

#[derive(Hash, Eq, PartialEq, Clone)]
struct CounterKey {
    name: String,
    labels: Vec<(String, String)>,
}

/// Local counter aggregator plus the notify emitter. Both are fire-
/// and-forget from the hot path's perspective: `process` never awaits
/// network I/O (spec §5).
pub struct TelemetryClient {
    stub: Mutex<InternalClient<Channel>>,
    auth_token: String,
    counters: Mutex<HashMap<CounterKey, f64>>,
    pending: Mutex<VecDeque<Vec<MetricCounter>>>,
}

impl TelemetryClient {
    pub fn new(stub: InternalClient<Channel>, auth_token: String) -> Self {
        Self {
            stub: Mutex::new(stub),
            auth_token,
            counters: Mutex::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Increment a named counter by `value` (default 1.0 at call sites
    /// that don't care), tagged with `labels`.
    pub async fn incr(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = CounterKey {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        *self.counters.lock().await.entry(key).or_insert(0.0) += value;
    }

    /// Notify the control plane that a step's failure condition fired.
    /// Skipped entirely under dry-run by the caller (spec §4.D step 7).
    pub async fn notify(&self, pipeline_id: &str, step_name: &str, audience: Audience) {
        let mut request = Request::new(NotifyRequest {
            pipeline_id: pipeline_id.to_string(),
            step_name: step_name.to_string(),
            audience: Some(audience),
        });
        request
            .metadata_mut()
            .insert("auth-token", self.auth_token.parse().unwrap());

        if let Err(err) = self.stub.lock().await.notify(request).await {
            tracing::warn!(error = %err, "notify emission failed, dropping");
        }
    }

    /// Drain accumulated counters into a batch, and attempt to flush
    /// every pending batch (this tick's plus any retained from prior
    /// ticks that failed to send). Called once per second by the
    /// metrics flusher task.
    pub async fn flush_tick(&self) {
        let batch: Vec<MetricCounter> = {
            let mut counters = self.counters.lock().await;
            let drained = counters
                .drain()
                .map(|(key, value)| MetricCounter {
                    name: key.name,
                    labels: key.labels.into_iter().collect(),
                    value,
                })
                .collect();
            drained
        };

        let mut pending = self.pending.lock().await;
        if !batch.is_empty() {
            if pending.len() >= MAX_PENDING_BATCHES {
                pending.pop_front();
                tracing::warn!("metrics batch backlog full, dropping oldest batch");
            }
            pending.push_back(batch);
        }

        while let Some(next) = pending.front().cloned() {
            let mut request = Request::new(MetricsRequest { counters: next });
            request
                .metadata_mut()
                .insert("auth-token", self.auth_token.parse().unwrap());

            match self.stub.lock().await.metrics(request).await {
                Ok(_) => {
                    pending.pop_front();
                }
                Err(err) => {
                    tracing::warn!(error = %err, "metrics flush failed, retaining batch for retry");
                    break;
                }
            }
        }
    }
}
