// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The payload processor: the per-message pipeline execution engine
//! (spec §4.D).
//!
//! `process` never suspends on network I/O — notify, tail publish, and
//! metrics are all either non-blocking enqueues or dispatched to
//! background tasks, so a caller observes deterministic wall-clock time
//! dominated only by the WASM steps themselves (spec §5).

use std::sync::Arc;

use crate::audience::{encode, op_to_string};
use crate::config::StreamdalConfig;
use crate::proto::{Audience, OperationType, PipelineStepCondition, TailType, WasmExitCode};
use crate::registry::PipelineRegistry;
use crate::tail::TailController;
use crate::telemetry::TelemetryClient;
use crate::types::{ProcessRequest, ProcessResponse};
use crate::wasm::WasmBridge;

/// Maximum payload size the processor will run through a pipeline
/// (spec §4.D step 2).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

pub struct PayloadProcessor {
    cfg: Arc<StreamdalConfig>,
    registry: Arc<PipelineRegistry>,
    wasm: Arc<WasmBridge>,
    metrics: Arc<TelemetryClient>,
    tail: Arc<TailController>,
}

impl PayloadProcessor {
    pub fn new(
        cfg: Arc<StreamdalConfig>,
        registry: Arc<PipelineRegistry>,
        wasm: Arc<WasmBridge>,
        metrics: Arc<TelemetryClient>,
        tail: Arc<TailController>,
    ) -> Self {
        Self {
            cfg,
            registry,
            wasm,
            metrics,
            tail,
        }
    }

    /// Run `req` through every active pipeline attached to its
    /// audience. Never raises: a missing request is reported through
    /// `ProcessResponse.error`, not a panic (spec §7, and the
    /// documented deviation in `SPEC_FULL.md` §7).
    pub async fn process(&self, req: Option<ProcessRequest>) -> ProcessResponse {
        let Some(req) = req else {
            return ProcessResponse {
                data: Vec::new(),
                error: true,
                message: "req is required".to_string(),
            };
        };

        let audience = Audience {
            service_name: self.cfg.service_name.clone(),
            component_name: req.component_name.clone(),
            operation_name: req.operation_name.clone(),
            operation_type: req.operation_type,
        };
        let audience_key = encode(&audience);
        let direction = op_to_string(OperationType::from_i32(req.operation_type).unwrap_or(OperationType::Unset));

        if req.data.len() > MAX_PAYLOAD_SIZE {
            self.metrics
                .incr("payload_too_large", &[("audience", audience_key.as_str())], 1.0)
                .await;
            return ProcessResponse {
                data: req.data,
                error: false,
                message: String::new(),
            };
        }

        let pipelines = self.registry.get_active(&audience).await;
        if pipelines.is_empty() {
            return ProcessResponse {
                data: req.data,
                error: false,
                message: String::new(),
            };
        }

        self.metrics
            .incr(
                "process",
                &[("audience", audience_key.as_str()), ("direction", direction)],
                req.data.len() as f64,
            )
            .await;

        if self.tail.has_tail(&audience).await {
            self.tail
                .publish(&audience, TailType::Request, &req.data, &req.data)
                .await;
        }

        let mut working = req.data.clone();

        for pipeline in &pipelines {
            for step in &pipeline.steps {
                let wasm_resp = self.wasm.exec(step, &working).await;
                working = wasm_resp.output_payload.clone();

                let conditions = if wasm_resp.exit_code == WasmExitCode::Success as i32 {
                    &step.on_success
                } else {
                    &step.on_failure
                };

                let should_abort = self
                    .apply_conditions(conditions, &pipeline.id, &step.name, &audience)
                    .await;

                if should_abort && !self.cfg.dry_run {
                    return ProcessResponse {
                        data: working,
                        error: true,
                        message: wasm_resp.exit_msg,
                    };
                }
            }
        }

        if self.tail.has_tail(&audience).await {
            self.tail
                .publish(&audience, TailType::Response, &req.data, &working)
                .await;
        }

        self.metrics
            .incr(
                "process",
                &[("audience", audience_key.as_str()), ("direction", direction)],
                working.len() as f64,
            )
            .await;

        if self.cfg.dry_run {
            return ProcessResponse {
                data: req.data,
                error: false,
                message: String::new(),
            };
        }

        ProcessResponse {
            data: working,
            error: false,
            message: String::new(),
        }
    }

    /// Apply a step's condition list (whichever of `on_success`/
    /// `on_failure` applies to the disposition that fired). Each
    /// condition is handled the same way regardless of which list it
    /// came from: `NOTIFY` emits a notification, `ABORT` sets the
    /// pipeline to abort (spec §4.D step 7).
    async fn apply_conditions(
        &self,
        conditions: &[i32],
        pipeline_id: &str,
        step_name: &str,
        audience: &Audience,
    ) -> bool {
        let mut abort = false;

        for raw in conditions {
            match PipelineStepCondition::from_i32(*raw) {
                Some(PipelineStepCondition::Notify) => {
                    if !self.cfg.dry_run {
                        self.metrics
                            .notify(pipeline_id, step_name, audience.clone())
                            .await;
                    }
                }
                Some(PipelineStepCondition::Abort) => {
                    abort = true;
                }
                _ => {
                    // Unknown/UNSET conditions mean "continue to next
                    // step" and do not change control flow (spec §3).
                }
            }
        }

        abort
    }
}
