// Copyright (c) 2026 Namechain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Prometheus metrics container and /metrics exposition endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Known peers gauge.
    pub peers: IntGauge,
    /// Ledger height gauge.
    pub block_height: IntGauge,
    /// Pending transactions gauge.
    pub mempool_size: IntGauge,
    /// Committed transactions.
    pub transactions_total: IntCounter,
    /// Committed blocks.
    pub blocks_committed_total: IntCounter,

    /// Undecodable inbound payloads.
    pub malformed_total: IntCounter,
    /// Signature failures on transactions or blocks.
    pub signature_invalid_total: IntCounter,
    /// Historical no-ops (ownership or uniqueness conflicts).
    pub state_conflict_total: IntCounter,
    /// Parent-mismatch blocks that triggered sync.
    pub forks_detected_total: IntCounter,
    /// Local queue rotations after a silent leader.
    pub leader_failovers_total: IntCounter,

    /// DNS queries handled.
    pub dns_queries_total: IntCounter,
    /// Queries forwarded upstream.
    pub dns_forwarded_total: IntCounter,
    /// Read-cache hits.
    pub dns_cache_hits_total: IntCounter,
    /// Read-cache misses.
    pub dns_cache_misses_total: IntCounter,
    /// UDP replies truncated with TC=1.
    pub dns_truncated_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let peers =
            IntGauge::new("namechain_peers", "Known peers").map_err(|_| MetricsError::Prom)?;
        let block_height = IntGauge::new("namechain_block_height", "Current ledger height")
            .map_err(|_| MetricsError::Prom)?;
        let mempool_size = IntGauge::new("namechain_mempool_size", "Pending transactions")
            .map_err(|_| MetricsError::Prom)?;
        let transactions_total =
            IntCounter::new("namechain_transactions_total", "Committed transactions")
                .map_err(|_| MetricsError::Prom)?;
        let blocks_committed_total =
            IntCounter::new("namechain_blocks_committed_total", "Committed blocks")
                .map_err(|_| MetricsError::Prom)?;

        let malformed_total =
            IntCounter::new("namechain_malformed_total", "Undecodable inbound payloads")
                .map_err(|_| MetricsError::Prom)?;
        let signature_invalid_total =
            IntCounter::new("namechain_signature_invalid_total", "Signature failures")
                .map_err(|_| MetricsError::Prom)?;
        let state_conflict_total =
            IntCounter::new("namechain_state_conflict_total", "Historical no-op transactions")
                .map_err(|_| MetricsError::Prom)?;
        let forks_detected_total =
            IntCounter::new("namechain_forks_detected_total", "Parent-mismatch blocks")
                .map_err(|_| MetricsError::Prom)?;
        let leader_failovers_total =
            IntCounter::new("namechain_leader_failovers_total", "Local failover rotations")
                .map_err(|_| MetricsError::Prom)?;

        let dns_queries_total =
            IntCounter::new("namechain_dns_queries_total", "DNS queries handled")
                .map_err(|_| MetricsError::Prom)?;
        let dns_forwarded_total =
            IntCounter::new("namechain_dns_forwarded_total", "Queries forwarded upstream")
                .map_err(|_| MetricsError::Prom)?;
        let dns_cache_hits_total =
            IntCounter::new("namechain_dns_cache_hits_total", "Zone read-cache hits")
                .map_err(|_| MetricsError::Prom)?;
        let dns_cache_misses_total =
            IntCounter::new("namechain_dns_cache_misses_total", "Zone read-cache misses")
                .map_err(|_| MetricsError::Prom)?;
        let dns_truncated_total =
            IntCounter::new("namechain_dns_truncated_total", "Truncated UDP replies")
                .map_err(|_| MetricsError::Prom)?;

        for collector in [
            Box::new(peers.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(block_height.clone()),
            Box::new(mempool_size.clone()),
        ] {
            registry.register(collector).map_err(|_| MetricsError::Prom)?;
        }
        for counter in [
            &transactions_total,
            &blocks_committed_total,
            &malformed_total,
            &signature_invalid_total,
            &state_conflict_total,
            &forks_detected_total,
            &leader_failovers_total,
            &dns_queries_total,
            &dns_forwarded_total,
            &dns_cache_hits_total,
            &dns_cache_misses_total,
            &dns_truncated_total,
        ] {
            registry.register(Box::new(counter.clone())).map_err(|_| MetricsError::Prom)?;
        }

        Ok(Self {
            registry,
            peers,
            block_height,
            mempool_size,
            transactions_total,
            blocks_committed_total,
            malformed_total,
            signature_invalid_total,
            state_conflict_total,
            forks_detected_total,
            leader_failovers_total,
            dns_queries_total,
            dns_forwarded_total,
            dns_cache_hits_total,
            dns_cache_misses_total,
            dns_truncated_total,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> String {
    metrics.render()
}

/// Serve `/metrics` on `listen_addr` until the task is dropped.
pub async fn serve(listen_addr: String, metrics: Arc<Metrics>) {
    let app = Router::new().route("/metrics", get(metrics_handler)).with_state(metrics);
    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!(addr = %listen_addr, err = %e, "metrics listener bind failed");
            return;
        }
    };
    info!(addr = %listen_addr, "metrics endpoint up");
    if let Err(e) = axum::serve(listener, app).await {
        warn!(err = %e, "metrics server exited");
    }
}
