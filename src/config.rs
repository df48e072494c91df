// Configuration management module
// Loads settings from an optional config/default file and APP__-prefixed
// environment variables, and turns them into the runtime pieces they describe

use crate::control::BreakerPolicy;
use crate::model::AssetId;
use crate::router::aggregator::AggregatorSettings;
use crate::router::coordinator::CoordinatorSettings;
use crate::router::execution::PollPolicy;
use crate::venues::adapter::BackendRegistry;
use crate::venues::dedust::{DedustBackend, DedustSettings};
use crate::venues::stonfi::{StonfiBackend, StonfiSettings};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Default pTON master used by STON.fi v1 routers.
pub const DEFAULT_PTON_MASTER: &str = "EQCM3B12QK1e4yZSf8GtBRT0aLMNyEsBc_DhVfRRtOEffLez";
/// Default wallet v4/v5 subwallet id on the basechain.
pub const DEFAULT_SUBWALLET_ID: u32 = 698_983_191;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub wallet: WalletConfig,
    /// Trades allowed in flight at once
    pub max_inflight: Option<usize>,
    /// Trades admitted per second
    pub rate_per_sec: Option<u32>,
    /// HTTP API listen address, e.g. 0.0.0.0:8080
    pub api_bind: Option<String>,
    pub quote: Option<QuoteConfig>,
    pub poll: Option<PollConfig>,
    pub breaker: Option<BreakerConfig>,
    pub dedust: Option<DedustConfig>,
    pub stonfi: Option<StonfiConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// toncenter v2 JSON-RPC endpoint, e.g. https://toncenter.com/api/v2/jsonRPC
    pub rpc_endpoint: Url,
    /// toncenter v3 index base, e.g. https://toncenter.com/api/v3/
    pub index_endpoint: Url,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub address: String,
    /// Hex-encoded 32-byte Ed25519 private key (do not use in prod; replace with HSM)
    pub ed25519_secret_hex: String,
    pub subwallet_id: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteConfig {
    pub budget_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    pub initial_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub multiplier: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    pub window: Option<usize>,
    pub threshold: Option<f32>,
    pub min_samples: Option<usize>,
    pub cooldown_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultEntry {
    /// `native` or a jetton master address
    pub asset: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedustConfig {
    pub enabled: Option<bool>,
    pub api: Url,
    pub native_vault: Option<String>,
    /// Jetton vaults; keys would be lowercased by the config crate, so they are listed
    #[serde(default)]
    pub jetton_vaults: Vec<VaultEntry>,
    pub gas_per_swap: Option<u64>,
    pub gas_per_extra_hop: Option<u64>,
    pub jetton_transfer_gas: Option<u64>,
    pub quote_ttl_secs: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StonfiConfig {
    pub enabled: Option<bool>,
    pub api: Url,
    pub pton_master: Option<String>,
    pub pton_wallet: Option<String>,
    pub forward_gas: Option<u64>,
    pub transfer_gas: Option<u64>,
    pub simulate_slippage: Option<f64>,
    pub quote_ttl_secs: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()
            .context("assemble configuration sources")?;
        cfg.try_deserialize().context("deserialize configuration")
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        let raw = self.api_bind.as_deref().unwrap_or("0.0.0.0:8080");
        raw.parse()
            .with_context(|| format!("invalid api_bind address: {raw}"))
    }

    pub fn subwallet_id(&self) -> u32 {
        self.wallet.subwallet_id.unwrap_or(DEFAULT_SUBWALLET_ID)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger.request_timeout_ms.unwrap_or(10_000))
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        let mut settings = CoordinatorSettings {
            max_inflight: self.max_inflight.unwrap_or(16),
            rate_per_sec: self.rate_per_sec,
            ..CoordinatorSettings::default()
        };
        if let Some(q) = &self.quote {
            let defaults = AggregatorSettings::default();
            settings.aggregator = AggregatorSettings {
                budget: q.budget_ms.map(Duration::from_millis).unwrap_or(defaults.budget),
                retry_delay: q
                    .retry_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry_delay),
            };
        }
        if let Some(p) = &self.poll {
            let defaults = PollPolicy::default();
            settings.poll = PollPolicy {
                initial_interval: p
                    .initial_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.initial_interval),
                max_interval: p.max_ms.map(Duration::from_millis).unwrap_or(defaults.max_interval),
                multiplier: p.multiplier.unwrap_or(defaults.multiplier),
            };
        }
        if let Some(b) = &self.breaker {
            let defaults = BreakerPolicy::default();
            settings.breaker = BreakerPolicy {
                max_window: b.window.unwrap_or(defaults.max_window),
                threshold: b.threshold.unwrap_or(defaults.threshold),
                min_samples: b.min_samples.unwrap_or(defaults.min_samples),
                open_cooldown: b
                    .cooldown_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.open_cooldown),
            };
        }
        settings
    }

    /// Backends enabled by configuration; at least one is required.
    pub fn build_backends(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();

        if let Some(settings) = self.dedust_settings()? {
            registry.register(Arc::new(
                DedustBackend::new(settings).context("initialize DeDust backend")?,
            ));
            info!("DeDust backend enabled");
        }
        if let Some(settings) = self.stonfi_settings() {
            registry.register(Arc::new(
                StonfiBackend::new(settings).context("initialize STON.fi backend")?,
            ));
            info!("STON.fi backend enabled");
        }

        if registry.is_empty() {
            bail!("no DEX backend enabled; configure APP__DEDUST__API and/or APP__STONFI__API");
        }
        Ok(registry)
    }

    pub fn dedust_settings(&self) -> Result<Option<DedustSettings>> {
        let cfg = match &self.dedust {
            Some(cfg) if cfg.enabled.unwrap_or(true) => cfg,
            _ => return Ok(None),
        };
        let mut vaults = HashMap::new();
        if let Some(native) = &cfg.native_vault {
            vaults.insert(AssetId::Native, native.clone());
        }
        for entry in &cfg.jetton_vaults {
            let asset: AssetId = entry
                .asset
                .parse()
                .map_err(|e| anyhow::anyhow!("dedust vault asset {:?}: {e}", entry.asset))?;
            vaults.insert(asset, entry.address.clone());
        }
        if vaults.is_empty() {
            bail!("DeDust is enabled but no vaults are configured");
        }

        Ok(Some(DedustSettings {
            api: cfg.api.clone(),
            vaults,
            gas_per_swap: cfg.gas_per_swap.map(u128::from).unwrap_or(200_000_000),
            gas_per_extra_hop: cfg.gas_per_extra_hop.map(u128::from).unwrap_or(100_000_000),
            jetton_transfer_gas: cfg.jetton_transfer_gas.map(u128::from).unwrap_or(50_000_000),
            quote_ttl: Duration::from_secs(cfg.quote_ttl_secs.unwrap_or(30)),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms.unwrap_or(3_000)),
        }))
    }

    pub fn stonfi_settings(&self) -> Option<StonfiSettings> {
        let cfg = match &self.stonfi {
            Some(cfg) if cfg.enabled.unwrap_or(true) => cfg,
            _ => return None,
        };
        Some(StonfiSettings {
            api: cfg.api.clone(),
            pton_master: cfg
                .pton_master
                .clone()
                .unwrap_or_else(|| DEFAULT_PTON_MASTER.to_string()),
            pton_wallet: cfg.pton_wallet.clone(),
            forward_gas: cfg.forward_gas.map(u128::from).unwrap_or(215_000_000),
            transfer_gas: cfg.transfer_gas.map(u128::from).unwrap_or(50_000_000),
            simulate_slippage: cfg.simulate_slippage.unwrap_or(0.01),
            quote_ttl: Duration::from_secs(cfg.quote_ttl_secs.unwrap_or(30)),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms.unwrap_or(3_000)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const BASE: &str = r#"
        [ledger]
        rpc_endpoint = "https://toncenter.com/api/v2/jsonRPC"
        index_endpoint = "https://toncenter.com/api/v3/"

        [wallet]
        address = "EQwallet"
        ed25519_secret_hex = "11"
    "#;

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let cfg = parse(BASE);
        assert_eq!(cfg.subwallet_id(), DEFAULT_SUBWALLET_ID);
        assert_eq!(cfg.api_addr().unwrap().port(), 8080);
        let settings = cfg.coordinator_settings();
        assert_eq!(settings.aggregator.budget, Duration::from_secs(3));
        assert_eq!(settings.poll.initial_interval, Duration::from_secs(2));
        assert!(cfg.build_backends().is_err());
    }

    #[test]
    fn backends_and_overrides_are_read() {
        let cfg = parse(&format!(
            r#"
            max_inflight = 4
            {BASE}

            [poll]
            max_ms = 10000

            [dedust]
            api = "https://api.dedust.io/"
            native_vault = "EQnativevault"
            jetton_vaults = [{{ asset = "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs", address = "EQusdtvault" }}]

            [stonfi]
            api = "https://api.ston.fi/"
            enabled = false
            "#
        ));
        let settings = cfg.coordinator_settings();
        assert_eq!(settings.max_inflight, 4);
        assert_eq!(settings.poll.max_interval, Duration::from_secs(10));

        let dedust = cfg.dedust_settings().unwrap().unwrap();
        assert_eq!(
            dedust
                .vaults
                .get(&AssetId::Jetton("EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs".into())),
            Some(&"EQusdtvault".to_string())
        );
        assert!(cfg.stonfi_settings().is_none());
        assert_eq!(cfg.build_backends().unwrap().len(), 1);
    }
}
