// STON.fi venue adapter
// Prices swaps through the STON.fi swap simulation API and encodes router
// swaps as jetton transfers (pTON for native offers) carrying a swap payload

use crate::errors::AggrError;
use crate::model::{AssetId, AssetPair, BackendId, PoolHop, Quote};
use crate::router::builder::{OutMessage, WalletContext};
use crate::router::routes::Route;
use crate::venues::adapter::{
    encode, http_client, parse_units, query_id, DexBackend, JettonTransfer, OP_JETTON_TRANSFER,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Router `swap` opcode carried in the jetton transfer forward payload.
pub const OP_SWAP: u32 = 0x2593_8561;

#[derive(Debug, Clone)]
pub struct StonfiSettings {
    pub api: Url,
    /// pTON master standing in for native TON in STON.fi pools.
    pub pton_master: String,
    /// Router's pTON wallet; required to offer native TON.
    pub pton_wallet: Option<String>,
    pub forward_gas: u128,
    pub transfer_gas: u128,
    /// Slippage tolerance sent with the simulation request.
    pub simulate_slippage: f64,
    pub quote_ttl: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StonfiBackend {
    id: BackendId,
    http: reqwest::Client,
    simulate_url: Url,
    settings: StonfiSettings,
}

impl StonfiBackend {
    pub fn new(settings: StonfiSettings) -> Result<Self> {
        let simulate_url = settings
            .api
            .join("v1/swap/simulate")
            .context("build STON.fi simulate url")?;
        Ok(Self {
            id: BackendId::new("stonfi"),
            http: http_client(settings.request_timeout)?,
            simulate_url,
            settings,
        })
    }

    fn address_of(&self, asset: &AssetId) -> String {
        match asset {
            AssetId::Native => self.settings.pton_master.clone(),
            AssetId::Jetton(master) => master.clone(),
        }
    }
}

#[async_trait]
impl DexBackend for StonfiBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    #[tracing::instrument(skip_all, fields(backend = "stonfi", pair = %pair, amount = %amount))]
    async fn quote(&self, pair: &AssetPair, amount: u128) -> Result<Quote, AggrError> {
        let offer = self.address_of(pair.base());
        let ask = self.address_of(pair.quote());
        let units = amount.to_string();
        let slippage = self.settings.simulate_slippage.to_string();
        let resp = self
            .http
            .post(self.simulate_url.clone())
            .query(&[
                ("offer_address", offer.as_str()),
                ("ask_address", ask.as_str()),
                ("units", units.as_str()),
                ("slippage_tolerance", slippage.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AggrError::Provider(format!("stonfi http {}", resp.status())));
        }
        let sim: SimulateResponse = resp.json().await?;
        let mut quote = quote_from_simulation(&self.id, pair, &sim)?;
        quote.valid_until = Utc::now()
            + chrono::Duration::from_std(self.settings.quote_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
        debug!(output = quote.output_amount, router = %quote.entry_address, "stonfi quote");
        Ok(quote)
    }

    fn fee_estimate(&self, route: &Route) -> u128 {
        let _ = route;
        self.settings.forward_gas + self.settings.transfer_gas
    }

    fn encode_swap(&self, route: &Route, wallet: &WalletContext) -> Result<OutMessage, AggrError> {
        let hop = match route.hops.as_slice() {
            [hop] => hop,
            _ => {
                return Err(AggrError::BuildTx(format!(
                    "stonfi routes are single-hop, got {}",
                    route.hops.len()
                )))
            }
        };
        let swap = SwapPayload {
            op: OP_SWAP,
            ask_address: self.address_of(&hop.asset_out),
            min_out: route.min_output,
            to_address: wallet.address.clone(),
            referral: None,
        };
        let amount = route.input_amount();
        let fee = self.fee_estimate(route);
        let transfer = JettonTransfer {
            op: OP_JETTON_TRANSFER,
            query_id: query_id(wallet),
            amount,
            destination: route.quote.entry_address.clone(),
            response_destination: wallet.address.clone(),
            forward_ton_amount: self.settings.forward_gas,
            forward_payload: encode(&swap)?,
        };

        let (destination, value) = match &hop.asset_in {
            AssetId::Native => {
                let pton_wallet = self.settings.pton_wallet.clone().ok_or_else(|| {
                    AggrError::BuildTx("native offers need stonfi.pton_wallet".into())
                })?;
                (pton_wallet, amount + fee)
            }
            AssetId::Jetton(_) => {
                let holding = wallet.offer_holding.as_ref().ok_or_else(|| {
                    AggrError::BuildTx("jetton offer without a jetton wallet".into())
                })?;
                (holding.wallet_address.clone(), fee)
            }
        };

        Ok(OutMessage {
            destination,
            value,
            body: encode(&transfer)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulateResponse {
    pub offer_address: String,
    pub ask_address: String,
    pub router_address: String,
    pub pool_address: String,
    pub offer_units: String,
    pub ask_units: String,
    #[serde(default)]
    pub min_ask_units: Option<String>,
    #[serde(default)]
    pub price_impact: Option<String>,
    #[serde(default)]
    pub fee_units: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapPayload {
    pub op: u32,
    pub ask_address: String,
    pub min_out: u128,
    pub to_address: String,
    pub referral: Option<String>,
}

pub fn quote_from_simulation(
    backend: &BackendId,
    pair: &AssetPair,
    sim: &SimulateResponse,
) -> Result<Quote, AggrError> {
    let input_amount = parse_units("offer_units", &sim.offer_units)?;
    let output_amount = parse_units("ask_units", &sim.ask_units)?;
    let price_impact = match sim.price_impact.as_deref() {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|e| AggrError::Decode(format!("price_impact={raw:?}: {e}")))?
            .abs(),
        None => 0.0,
    };
    if sim.router_address.is_empty() {
        return Err(AggrError::Provider("stonfi simulation has no router".into()));
    }

    Ok(Quote {
        backend: backend.clone(),
        input_amount,
        output_amount,
        price_impact,
        valid_until: Utc::now(),
        entry_address: sim.router_address.clone(),
        path: vec![PoolHop {
            pool: sim.pool_address.clone(),
            asset_in: pair.base().clone(),
            asset_out: pair.quote().clone(),
            amount_in: input_amount,
            amount_out: output_amount,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::builder::OfferHolding;

    const USDT: &str = "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs";
    const PTON: &str = "EQCM3B12QK1e4yZSf8GtBRT0aLMNyEsBc_DhVfRRtOEffLez";

    fn backend(pton_wallet: Option<&str>) -> StonfiBackend {
        StonfiBackend::new(StonfiSettings {
            api: Url::parse("https://api.ston.fi/").unwrap(),
            pton_master: PTON.into(),
            pton_wallet: pton_wallet.map(str::to_string),
            forward_gas: 215_000_000,
            transfer_gas: 50_000_000,
            simulate_slippage: 0.01,
            quote_ttl: Duration::from_secs(30),
            request_timeout: Duration::from_secs(3),
        })
        .unwrap()
    }

    fn simulation() -> SimulateResponse {
        serde_json::from_value(serde_json::json!({
            "offer_address": PTON,
            "ask_address": USDT,
            "router_address": "EQrouter",
            "pool_address": "EQpool",
            "offer_units": "100000000000",
            "ask_units": "98500000",
            "slippage_tolerance": "0.01",
            "min_ask_units": "97515000",
            "swap_rate": "0.000985",
            "price_impact": "0.0061",
            "fee_address": "EQfee",
            "fee_units": "295500",
            "fee_percent": "0.003"
        }))
        .unwrap()
    }

    fn pair() -> AssetPair {
        AssetPair::new(AssetId::Native, AssetId::Jetton(USDT.into())).unwrap()
    }

    fn wallet(holding: Option<OfferHolding>) -> WalletContext {
        WalletContext {
            address: "EQwallet".into(),
            subwallet_id: 698_983_191,
            seqno: 4,
            valid_until: 1_700_000_100,
            native_balance: 1_000_000_000_000,
            offer_holding: holding,
        }
    }

    #[test]
    fn simulation_becomes_single_hop_quote() {
        let quote = quote_from_simulation(&BackendId::new("stonfi"), &pair(), &simulation()).unwrap();
        assert_eq!(quote.input_amount, 100_000_000_000);
        assert_eq!(quote.output_amount, 98_500_000);
        assert!((quote.price_impact - 0.0061).abs() < 1e-12);
        assert_eq!(quote.entry_address, "EQrouter");
        assert_eq!(quote.path.len(), 1);
        assert_eq!(quote.path[0].asset_in, AssetId::Native);
    }

    #[test]
    fn malformed_units_are_decode_errors() {
        let mut sim = simulation();
        sim.ask_units = "lots".into();
        let err = quote_from_simulation(&BackendId::new("stonfi"), &pair(), &sim).unwrap_err();
        assert!(matches!(err, AggrError::Decode(_)));
    }

    #[test]
    fn native_offer_goes_through_pton_wallet() {
        let quote = quote_from_simulation(&BackendId::new("stonfi"), &pair(), &simulation()).unwrap();
        let route = Route::from_quote(quote, 100);

        assert!(backend(None).encode_swap(&route, &wallet(None)).is_err());

        let msg = backend(Some("EQptonwallet")).encode_swap(&route, &wallet(None)).unwrap();
        assert_eq!(msg.destination, "EQptonwallet");
        assert_eq!(msg.value, 100_000_000_000 + 265_000_000);

        let transfer: JettonTransfer = bcs::from_bytes(&msg.body).unwrap();
        assert_eq!(transfer.destination, "EQrouter");
        assert_eq!(transfer.forward_ton_amount, 215_000_000);
        let swap: SwapPayload = bcs::from_bytes(&transfer.forward_payload).unwrap();
        assert_eq!(swap.op, OP_SWAP);
        assert_eq!(swap.ask_address, USDT);
        assert_eq!(swap.min_out, 97_515_000);
        assert_eq!(swap.to_address, "EQwallet");
    }

    #[test]
    fn jetton_offer_uses_own_jetton_wallet() {
        let sell = AssetPair::new(AssetId::Jetton(USDT.into()), AssetId::Native).unwrap();
        let mut sim = simulation();
        sim.offer_units = "1000000".into();
        sim.ask_units = "190000000".into();
        let quote = quote_from_simulation(&BackendId::new("stonfi"), &sell, &sim).unwrap();
        let route = Route::from_quote(quote, 100);
        let holding = OfferHolding {
            balance: 2_000_000,
            wallet_address: "EQmyusdt".into(),
        };

        let msg = backend(None).encode_swap(&route, &wallet(Some(holding))).unwrap();
        assert_eq!(msg.destination, "EQmyusdt");
        assert_eq!(msg.value, 265_000_000);
        let transfer: JettonTransfer = bcs::from_bytes(&msg.body).unwrap();
        let swap: SwapPayload = bcs::from_bytes(&transfer.forward_payload).unwrap();
        assert_eq!(swap.ask_address, PTON);
    }
}
