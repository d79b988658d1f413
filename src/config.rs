// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Client configuration: construction, validation, and the environment
//! variable overlay described in spec §6.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_GRPC_URL: &str = "localhost";
const DEFAULT_GRPC_PORT: u16 = 9090;
const DEFAULT_GRPC_TOKEN: &str = "1234";
const DEFAULT_GRPC_TIMEOUT_SEC: u64 = 5;
const DEFAULT_PIPELINE_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_millis(10);

/// Whether this client embeds directly into an application (`Sdk`) or
/// runs as a sidecar/shim fronting another process (`Shim`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Sdk,
    Shim,
}

impl Default for ClientType {
    fn default() -> Self {
        ClientType::Sdk
    }
}

/// Configuration for a [`crate::client::StreamdalClient`].
///
/// Every field may also be supplied via environment variable; a
/// code-provided value always wins, falling back to the documented
/// `STREAMDAL_*` variable and then to the built-in default (spec §6).
#[derive(Debug, Clone)]
pub struct StreamdalConfig {
    pub service_name: String,
    pub grpc_url: String,
    pub grpc_port: u16,
    pub grpc_token: String,
    pub grpc_timeout: Duration,
    /// Advisory only; not enforced (spec §9 open question).
    pub pipeline_timeout: Duration,
    /// Advisory only; not enforced (spec §9 open question).
    pub step_timeout: Duration,
    pub dry_run: bool,
    pub client_type: ClientType,
}

impl StreamdalConfig {
    /// Start building a config for `service_name`, applying the
    /// `STREAMDAL_*` environment overlay for every other field.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name_or_env(service_name.into()),
            grpc_url: env_or("STREAMDAL_URL", DEFAULT_GRPC_URL),
            grpc_port: env::var("STREAMDAL_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_GRPC_PORT),
            grpc_token: env_or("STREAMDAL_TOKEN", DEFAULT_GRPC_TOKEN),
            grpc_timeout: Duration::from_secs(
                env::var("STREAMDAL_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_GRPC_TIMEOUT_SEC),
            ),
            pipeline_timeout: DEFAULT_PIPELINE_TIMEOUT,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            dry_run: env::var("STREAMDAL_DRY_RUN")
                .ok()
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            client_type: ClientType::Sdk,
        }
    }

    /// Override the service name, falling back to `STREAMDAL_SERVICE_NAME`
    /// when `name` is empty.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = service_name_or_env(name.into());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_client_type(mut self, client_type: ClientType) -> Self {
        self.client_type = client_type;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::MissingServiceName);
        }
        if self.grpc_url.is_empty() {
            return Err(ConfigError::MissingGrpcUrl);
        }
        if self.grpc_port == 0 {
            return Err(ConfigError::MissingGrpcPort);
        }
        if self.grpc_token.is_empty() {
            return Err(ConfigError::MissingGrpcToken);
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// A code-provided service name always wins; an empty one falls back to
/// `STREAMDAL_SERVICE_NAME`, same as every other field (spec §6).
fn service_name_or_env(name: String) -> String {
    if name.is_empty() {
        env_or("STREAMDAL_SERVICE_NAME", "")
    } else {
        name
    }
}
