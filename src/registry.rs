// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The pipeline registry: the indexed, mutable map from audience to its
//! active and paused pipelines (spec §4.B).
//!
//! Reads (from the payload processor) and writes (from the command
//! dispatcher) are serialized through a single [`tokio::sync::RwLock`]
//! per partition map, following the teacher's "readers copy out the
//! step list before executing, never hold the lock across WASM
//! execution" discipline (spec §5, §9).

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::audience::encode;
use crate::proto::{Audience, Pipeline};

type AudienceKey = String;
type PipelineId = String;

#[derive(Default)]
struct Partition {
    by_audience: HashMap<AudienceKey, HashMap<PipelineId, Pipeline>>,
}

impl Partition {
    fn put(&mut self, key: &str, pipeline: Pipeline) {
        self.by_audience
            .entry(key.to_string())
            .or_default()
            .insert(pipeline.id.clone(), pipeline);
    }

    fn remove(&mut self, key: &str, pipeline_id: &str) -> Option<Pipeline> {
        let pipelines = self.by_audience.get_mut(key)?;
        let removed = pipelines.remove(pipeline_id);
        if pipelines.is_empty() {
            self.by_audience.remove(key);
        }
        removed
    }

    fn contains(&self, key: &str, pipeline_id: &str) -> bool {
        self.by_audience
            .get(key)
            .map(|m| m.contains_key(pipeline_id))
            .unwrap_or(false)
    }

    fn ordered(&self, key: &str) -> Vec<Pipeline> {
        self.by_audience
            .get(key)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Indexed map of audience -> pipeline-id -> [`Pipeline`], split into
/// `active` and `paused` partitions. A pipeline-id appears in at most
/// one partition for a given audience at any time (invariant I1).
#[derive(Default)]
pub struct PipelineRegistry {
    active: RwLock<Partition>,
    paused: RwLock<Partition>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// If `pipeline.id` is already paused for this audience, update it
    /// there; otherwise install (or replace) it in `active`. This
    /// preserves the partition of an already-paused pipeline, per
    /// invariant I1 and the spec's adopted answer to the set-pipeline
    /// open question (§9): a set-command targeting an active id
    /// replaces it in place.
    pub async fn attach(&self, audience: &Audience, pipeline: Pipeline) {
        let key = encode(audience);

        let already_paused = self.paused.read().await.contains(&key, &pipeline.id);
        if already_paused {
            self.paused.write().await.put(&key, pipeline);
        } else {
            self.active.write().await.put(&key, pipeline);
        }
    }

    /// Remove `pipeline_id` from both partitions under `audience`.
    /// Pruning empty sub-maps is handled by [`Partition::remove`]
    /// (invariant I2).
    pub async fn detach(&self, audience: &Audience, pipeline_id: &str) {
        let key = encode(audience);
        self.active.write().await.remove(&key, pipeline_id);
        self.paused.write().await.remove(&key, pipeline_id);
    }

    /// Move `pipeline_id` from `active` to `paused`. No-op if it is
    /// already paused or missing entirely.
    pub async fn pause(&self, audience: &Audience, pipeline_id: &str) {
        let key = encode(audience);
        let pipeline = self.active.write().await.remove(&key, pipeline_id);
        if let Some(pipeline) = pipeline {
            self.paused.write().await.put(&key, pipeline);
        }
    }

    /// Move `pipeline_id` from `paused` to `active`. No-op if it is not
    /// currently paused.
    pub async fn resume(&self, audience: &Audience, pipeline_id: &str) {
        let key = encode(audience);
        let pipeline = self.paused.write().await.remove(&key, pipeline_id);
        if let Some(pipeline) = pipeline {
            self.active.write().await.put(&key, pipeline);
        }
    }

    /// Active pipelines for `audience`, in insertion order. Never
    /// returns a paused pipeline (invariant I3).
    pub async fn get_active(&self, audience: &Audience) -> Vec<Pipeline> {
        let key = encode(audience);
        self.active.read().await.ordered(&key)
    }

    #[cfg(test)]
    pub async fn is_paused(&self, audience: &Audience, pipeline_id: &str) -> bool {
        let key = encode(audience);
        self.paused.read().await.contains(&key, pipeline_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::OperationType;

    fn aud() -> Audience {
        Audience {
            service_name: "testing".to_string(),
            component_name: "kafka".to_string(),
            operation_name: "test-topic".to_string(),
            operation_type: OperationType::Producer as i32,
        }
    }

    fn pipeline(id: &str) -> Pipeline {
        Pipeline {
            id: id.to_string(),
            steps: vec![],
        }
    }

    #[tokio::test]
    async fn attach_then_get_active() {
        let registry = PipelineRegistry::new();
        registry.attach(&aud(), pipeline("p1")).await;

        let active = registry.get_active(&aud()).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "p1");
    }

    #[tokio::test]
    async fn pause_then_resume_restores_prior_state() {
        let registry = PipelineRegistry::new();
        registry.attach(&aud(), pipeline("p1")).await;

        registry.pause(&aud(), "p1").await;
        assert!(registry.get_active(&aud()).await.is_empty());
        assert!(registry.is_paused(&aud(), "p1").await);

        registry.resume(&aud(), "p1").await;
        assert_eq!(registry.get_active(&aud()).await.len(), 1);
        assert!(!registry.is_paused(&aud(), "p1").await);
    }

    #[tokio::test]
    async fn pause_is_idempotent_and_tolerates_missing_id() {
        let registry = PipelineRegistry::new();
        registry.pause(&aud(), "does-not-exist").await;
        assert!(registry.get_active(&aud()).await.is_empty());
    }

    #[tokio::test]
    async fn attach_to_paused_id_updates_in_place() {
        let registry = PipelineRegistry::new();
        registry.attach(&aud(), pipeline("p1")).await;
        registry.pause(&aud(), "p1").await;

        let mut updated = pipeline("p1");
        updated.steps.push(Default::default());
        registry.attach(&aud(), updated).await;

        assert!(registry.is_paused(&aud(), "p1").await);
        assert!(registry.get_active(&aud()).await.is_empty());
    }

    #[tokio::test]
    async fn detach_removes_from_both_partitions_and_prunes_empty_maps() {
        let registry = PipelineRegistry::new();
        registry.attach(&aud(), pipeline("p1")).await;
        registry.detach(&aud(), "p1").await;

        assert!(registry.get_active(&aud()).await.is_empty());
        assert!(!registry.is_paused(&aud(), "p1").await);
    }

    #[tokio::test]
    async fn attach_is_idempotent() {
        let registry = PipelineRegistry::new();
        registry.attach(&aud(), pipeline("p1")).await;
        registry.attach(&aud(), pipeline("p1")).await;

        assert_eq!(registry.get_active(&aud()).await.len(), 1);
    }
}
