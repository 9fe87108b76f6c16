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

//! Namechain node entrypoint (systemd-friendly).
//! Loads config, starts the node, and waits for ctrl-c.

use namechain::core::types::{
    ConsensusSettings, DnsSettings, MetricsSettings, NetConfig, NodeConfig, NodeSettings, PeerRole,
};
use tracing::{info, warn};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn default_config() -> NodeConfig {
    NodeConfig {
        node: NodeSettings {
            name: "namechain-node".to_string(),
            data_dir: env("NAMECHAIN_DATA_DIR", "./data"),
        },
        net: NetConfig {
            self_ip: "127.0.0.1".to_string(),
            bootstrap_ip: "127.0.0.1".to_string(),
            peer_port: 7600,
            role: PeerRole::Genesis,
        },
        consensus: ConsensusSettings::default(),
        dns: DnsSettings {
            origin: "chain.example.".to_string(),
            port: 5353,
            upstream: "1.1.1.1:53".to_string(),
        },
        metrics: MetricsSettings { listen_addr: String::new() },
    }
}

fn load_config() -> NodeConfig {
    let path = env("NAMECHAIN_CONFIG", "namechain.toml");
    match std::fs::read_to_string(&path) {
        Ok(text) => match toml::from_str(&text) {
            Ok(cfg) => {
                info!(path = %path, "config loaded");
                cfg
            }
            Err(e) => {
                warn!(path = %path, err = %e, "config parse failed; using defaults");
                default_config()
            }
        },
        Err(_) => {
            info!(path = %path, "no config file; using defaults");
            default_config()
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .compact()
        .try_init();

    let cfg = load_config();
    info!(name = %cfg.node.name, data_dir = %cfg.node.data_dir, "namechain node starting");

    let node = match namechain::node::Node::start(cfg).await {
        Ok(node) => node,
        Err(e) => {
            eprintln!("node start failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(err = %e, "signal handler failed; shutting down");
    }
    node.shutdown().await;
}
