use std::fs;

use serde::Deserialize;
use shared::protocol::{ChainConfig, ClusterConfig, NativeCurrency, PaymentsConfig};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub default_room: String,
    pub broadcast_capacity: usize,
    pub chain: ChainConfig,
    pub cluster: ClusterConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:1999".into(),
            default_room: "main".into(),
            broadcast_capacity: 256,
            chain: ChainConfig {
                chain_id: "0x1539676".into(),
                chain_name: "nillion fe testnet".into(),
                icon_urls: vec![
                    "https://nillion.com/wp-content/themes/nillion/assets/images/favicon.png".into(),
                ],
                native_currency: NativeCurrency {
                    name: "Nillion".into(),
                    symbol: "NIL".into(),
                    decimals: 18,
                },
                rpc_urls: vec!["https://rpc-endpoint.testnet-fe.nilogy.xyz".into()],
                block_explorer_urls: vec!["https://blockexplorer.testnet-fe.nilogy.xyz/".into()],
            },
            cluster: ClusterConfig {
                cluster_id: "f592f8ea-7651-4ab8-b692-ef149b783dc9".into(),
                bootnodes: vec![
                    "/dns/node-1.testnet-fe.nillion-network.nilogy.xyz/tcp/14211/wss/p2p/12D3KooWNbB2dobuVpH5qetmWnamsKr1G9rC5Sbvj2UsMt3jvQxK".into(),
                ],
                payments_config: PaymentsConfig {
                    rpc_endpoint: "https://rpc-endpoint.testnet-fe.nilogy.xyz".into(),
                    chain_id: 22_255_222,
                    payments_address: "0xc93bb22751a8bc8943f972b37075e8d1d2fec844".into(),
                    blinding_factors_manager_address: "0xb70da9f42eb0b7e9494345bacff4ed13bea3c49f"
                        .into(),
                },
            },
        }
    }
}

/// Shape of `hub.toml`; every key is optional.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    default_room: Option<String>,
    broadcast_capacity: Option<usize>,
    chain: Option<ChainConfig>,
    cluster: Option<ClusterConfig>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("hub.toml") {
        if let Err(err) = apply_file(&mut settings, &raw) {
            warn!(error = %err, "ignoring unreadable hub.toml");
        }
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings
}

pub(crate) fn apply_file(settings: &mut Settings, raw: &str) -> Result<(), toml::de::Error> {
    let file: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file.bind_addr {
        settings.bind = v;
    }
    if let Some(v) = file.default_room {
        settings.default_room = v;
    }
    if let Some(v) = file.broadcast_capacity.filter(|capacity| *capacity > 0) {
        settings.broadcast_capacity = v;
    }
    if let Some(v) = file.chain {
        settings.chain = v;
    }
    if let Some(v) = file.cluster {
        settings.cluster = v;
    }
    Ok(())
}

pub(crate) fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("HUB_BIND") {
        settings.bind = v;
    }
    if let Some(v) = var("APP__BIND_ADDR") {
        settings.bind = v;
    }

    if let Some(v) = var("HUB_DEFAULT_ROOM") {
        settings.default_room = v;
    }

    if let Some(v) = var("HUB_BROADCAST_CAPACITY") {
        match v.parse::<usize>() {
            Ok(parsed) if parsed > 0 => settings.broadcast_capacity = parsed,
            _ => warn!(value = %v, "ignoring invalid HUB_BROADCAST_CAPACITY"),
        }
    }

    if let Some(v) = var("HUB_CLUSTER_ID") {
        settings.cluster.cluster_id = v;
    }
    if let Some(v) = var("HUB_CHAIN_ID") {
        settings.chain.chain_id = v;
    }
    if let Some(v) = var("HUB_RPC_URL") {
        settings.chain.rpc_urls = vec![v.clone()];
        settings.cluster.payments_config.rpc_endpoint = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
