// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Routes inbound `Command` messages from the registration stream to
//! the registry and tail controller (spec §4.E).

use std::sync::Arc;

use crate::proto::command::Command as CommandArm;
use crate::proto::{Audience, Command, OperationType};
use crate::registry::PipelineRegistry;
use crate::tail::TailController;

pub struct Dispatcher {
    service_name: String,
    registry: Arc<PipelineRegistry>,
    tail: Arc<TailController>,
}

impl Dispatcher {
    pub fn new(service_name: String, registry: Arc<PipelineRegistry>, tail: Arc<TailController>) -> Self {
        Self {
            service_name,
            registry,
            tail,
        }
    }

    /// Validate preconditions and route a single command. Silently
    /// ignores commands for a different service, logs and ignores an
    /// `UNSET` operation type, and logs-and-continues on an empty
    /// (unrecognised) oneof arm (spec §4.E).
    pub async fn dispatch(&self, cmd: Command) {
        let Some(audience) = &cmd.audience else {
            tracing::warn!("command missing audience, ignoring");
            return;
        };

        if audience.service_name != self.service_name {
            return;
        }

        if audience.operation_type == OperationType::Unset as i32 {
            tracing::warn!(audience = ?audience, "command has UNSET operation_type, ignoring");
            return;
        }

        match cmd.command {
            Some(CommandArm::KeepAlive(_)) => {
                // Liveness deadline is tracked by the session's
                // heartbeat/reconnect loop, not here.
            }
            Some(CommandArm::AttachPipeline(attach)) => {
                if let Some(pipeline) = attach.pipeline {
                    self.registry.attach(audience, pipeline).await;
                }
            }
            Some(CommandArm::DetachPipeline(detach)) => {
                self.registry.detach(audience, &detach.pipeline_id).await;
            }
            Some(CommandArm::PausePipeline(pause)) => {
                self.registry.pause(audience, &pause.pipeline_id).await;
            }
            Some(CommandArm::ResumePipeline(resume)) => {
                self.registry.resume(audience, &resume.pipeline_id).await;
            }
            Some(CommandArm::Tail(tail)) => {
                self.tail.start(&tail.id, audience, tail.sample_rate).await;
            }
            Some(CommandArm::TailStop(tail_stop)) => {
                self.tail.stop(&tail_stop.id).await;
            }
            None => {
                tracing::warn!("unknown command, ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{AttachPipelineCommand, Pipeline};
    use crate::telemetry::TelemetryClient;
    use tonic::transport::Endpoint;

    fn stub() -> crate::proto::internal_client::InternalClient<tonic::transport::Channel> {
        let channel = Endpoint::from_static("http://localhost:9090").connect_lazy();
        crate::proto::internal_client::InternalClient::new(channel)
    }

    fn aud(service_name: &str, op: OperationType) -> Audience {
        Audience {
            service_name: service_name.to_string(),
            component_name: "kafka".to_string(),
            operation_name: "test-topic".to_string(),
            operation_type: op as i32,
        }
    }

    fn harness(service_name: &str) -> (Dispatcher, Arc<PipelineRegistry>) {
        let registry = Arc::new(PipelineRegistry::new());
        let metrics = Arc::new(TelemetryClient::new(stub(), "token".to_string()));
        let tail = Arc::new(TailController::new(
            stub(),
            "token".to_string(),
            "session".to_string(),
            metrics,
        ));
        let dispatcher = Dispatcher::new(service_name.to_string(), registry.clone(), tail);
        (dispatcher, registry)
    }

    #[tokio::test]
    async fn attach_pipeline_installs_into_registry() {
        let (dispatcher, registry) = harness("testing");
        let audience = aud("testing", OperationType::Producer);

        dispatcher
            .dispatch(Command {
                audience: Some(audience.clone()),
                command: Some(CommandArm::AttachPipeline(AttachPipelineCommand {
                    pipeline: Some(Pipeline {
                        id: "p1".to_string(),
                        steps: vec![],
                    }),
                })),
            })
            .await;

        assert_eq!(registry.get_active(&audience).await.len(), 1);
    }

    #[tokio::test]
    async fn command_for_a_different_service_is_ignored() {
        let (dispatcher, registry) = harness("testing");
        let audience = aud("someone-else", OperationType::Producer);

        dispatcher
            .dispatch(Command {
                audience: Some(audience.clone()),
                command: Some(CommandArm::AttachPipeline(AttachPipelineCommand {
                    pipeline: Some(Pipeline {
                        id: "p1".to_string(),
                        steps: vec![],
                    }),
                })),
            })
            .await;

        assert!(registry.get_active(&audience).await.is_empty());
    }

    #[tokio::test]
    async fn unset_operation_type_is_ignored() {
        let (dispatcher, registry) = harness("testing");
        let audience = aud("testing", OperationType::Unset);

        dispatcher
            .dispatch(Command {
                audience: Some(audience.clone()),
                command: Some(CommandArm::AttachPipeline(AttachPipelineCommand {
                    pipeline: Some(Pipeline {
                        id: "p1".to_string(),
                        steps: vec![],
                    }),
                })),
            })
            .await;

        assert!(registry.get_active(&audience).await.is_empty());
    }

    #[tokio::test]
    async fn detach_removes_from_registry() {
        let (dispatcher, registry) = harness("testing");
        let audience = aud("testing", OperationType::Producer);
        registry
            .attach(
                &audience,
                Pipeline {
                    id: "p1".to_string(),
                    steps: vec![],
                },
            )
            .await;

        dispatcher
            .dispatch(Command {
                audience: Some(audience.clone()),
                command: Some(CommandArm::DetachPipeline(crate::proto::DetachPipelineCommand {
                    pipeline_id: "p1".to_string(),
                })),
            })
            .await;

        assert!(registry.get_active(&audience).await.is_empty());
    }
}
