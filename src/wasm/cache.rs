// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The WASM instance cache: one instantiated module per `wasm_id`,
//! populated lazily and never evicted during normal operation (spec
//! §3). Each entry is wrapped in its own `tokio::sync::Mutex` so
//! concurrent `process` calls against the same `wasm_id` serialize on
//! the store, per the "if the runtime requires exclusive access"
//! design note (spec §9).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use wasmtime::{Engine, Instance, Linker, Module, Store};
use wasmtime_wasi::p1::{self, WasiP1Ctx};
use wasmtime_wasi::WasiCtxBuilder;

use crate::error::WasmError;

/// A lazily-instantiated WASM module plus its store, guarded for
/// exclusive per-invocation access.
pub struct WasmInstance {
    pub store: Mutex<Store<WasiP1Ctx>>,
    pub instance: Instance,
}

/// Cache mapping `wasm_id -> WasmInstance`, shared by every concurrent
/// payload processor. Entries are dropped only when the owning
/// pipeline is removed from every audience (best-effort, spec §3).
pub struct WasmInstanceCache {
    engine: Engine,
    entries: RwLock<HashMap<String, Arc<WasmInstance>>>,
}

impl WasmInstanceCache {
    pub fn new() -> Self {
        Self {
            engine: Engine::default(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the cached instance for `wasm_id`, instantiating it from
    /// `wasm_bytes` on first use. `wasm_bytes` is ignored on a cache
    /// hit, matching the spec's note that `step.wasm_bytes` "may be
    /// empty after first load".
    pub async fn get_or_create(
        &self,
        wasm_id: &str,
        wasm_bytes: &[u8],
    ) -> Result<Arc<WasmInstance>, WasmError> {
        if let Some(existing) = self.entries.read().await.get(wasm_id) {
            return Ok(existing.clone());
        }

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(wasm_id) {
            return Ok(existing.clone());
        }

        let instance = Self::instantiate(&self.engine, wasm_bytes)?;
        let entry = Arc::new(instance);
        entries.insert(wasm_id.to_string(), entry.clone());
        Ok(entry)
    }

    /// Drop the cached instance for `wasm_id`, if any. Called
    /// best-effort when a pipeline is detached from every audience; a
    /// stale entry left behind is acceptable (spec §3).
    pub async fn evict(&self, wasm_id: &str) {
        self.entries.write().await.remove(wasm_id);
    }

    /// Drop every cached instance. Called on client shutdown (spec
    /// §4.F).
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    fn instantiate(engine: &Engine, wasm_bytes: &[u8]) -> Result<WasmInstance, WasmError> {
        let module = Module::new(engine, wasm_bytes)
            .map_err(WasmError::Instantiate)?;

        let mut linker: Linker<WasiP1Ctx> = Linker::new(engine);
        p1::add_to_linker_sync(&mut linker, |ctx: &mut WasiP1Ctx| ctx)
            .map_err(WasmError::Instantiate)?;

        let wasi = WasiCtxBuilder::new()
            .inherit_stdin()
            .inherit_stdout()
            .inherit_stderr()
            .build_p1();

        let mut store = Store::new(engine, wasi);
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(WasmError::Instantiate)?;

        Ok(WasmInstance {
            store: Mutex::new(store),
            instance,
        })
    }
}

impl Default for WasmInstanceCache {
    fn default() -> Self {
        Self::new()
    }
}
