// DeDust venue adapter
// Prices swaps through the DeDust routing API and encodes vault swap
// messages (native vault swap or jetton transfer with a swap payload)

use crate::errors::AggrError;
use crate::model::{AssetId, AssetPair, BackendId, PoolHop, Quote};
use crate::router::builder::{OutMessage, WalletContext};
use crate::router::routes::{HopInstruction, Route};
use crate::venues::adapter::{
    compound_impact, constant_product_impact, encode, http_client, parse_units, query_id,
    DexBackend, JettonTransfer, OP_JETTON_TRANSFER,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Native vault `swap` opcode.
pub const OP_NATIVE_SWAP: u32 = 0xea06_185d;
/// Jetton vault swap forward-payload opcode.
pub const OP_JETTON_SWAP: u32 = 0xe3a0_d482;

#[derive(Debug, Clone)]
pub struct DedustSettings {
    pub api: Url,
    /// Vault address per offered asset.
    pub vaults: HashMap<AssetId, String>,
    pub gas_per_swap: u128,
    pub gas_per_extra_hop: u128,
    pub jetton_transfer_gas: u128,
    pub quote_ttl: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DedustBackend {
    id: BackendId,
    http: reqwest::Client,
    plan_url: Url,
    settings: DedustSettings,
}

impl DedustBackend {
    pub fn new(settings: DedustSettings) -> Result<Self> {
        let plan_url = settings
            .api
            .join("v2/routing/plan")
            .context("build DeDust routing plan url")?;
        Ok(Self {
            id: BackendId::new("dedust"),
            http: http_client(settings.request_timeout)?,
            plan_url,
            settings,
        })
    }

    fn vault_for(&self, asset: &AssetId) -> Result<&str, AggrError> {
        self.settings
            .vaults
            .get(asset)
            .map(String::as_str)
            .ok_or_else(|| AggrError::Provider(format!("no DeDust vault configured for {asset}")))
    }
}

#[async_trait]
impl DexBackend for DedustBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    #[tracing::instrument(skip_all, fields(backend = "dedust", pair = %pair, amount = %amount))]
    async fn quote(&self, pair: &AssetPair, amount: u128) -> Result<Quote, AggrError> {
        let entry = self.vault_for(pair.base())?.to_string();
        let body = PlanRequest {
            from: asset_to_api(pair.base()),
            to: asset_to_api(pair.quote()),
            amount: amount.to_string(),
        };
        let resp = self
            .http
            .post(self.plan_url.clone())
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AggrError::Provider(format!("dedust http {}", resp.status())));
        }
        let plans: Vec<Vec<PlanStep>> = resp.json().await?;
        let mut quote = quote_from_plans(&self.id, pair, plans)?;
        quote.entry_address = entry;
        quote.valid_until = Utc::now()
            + chrono::Duration::from_std(self.settings.quote_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
        debug!(output = quote.output_amount, hops = quote.path.len(), "dedust quote");
        Ok(quote)
    }

    fn fee_estimate(&self, route: &Route) -> u128 {
        let extra_hops = route.hops.len().saturating_sub(1) as u128;
        let mut fee = self.settings.gas_per_swap + extra_hops * self.settings.gas_per_extra_hop;
        if route.offer_asset().is_some_and(|a| !a.is_native()) {
            fee += self.settings.jetton_transfer_gas;
        }
        fee
    }

    fn encode_swap(&self, route: &Route, wallet: &WalletContext) -> Result<OutMessage, AggrError> {
        let step = swap_steps(&route.hops)
            .ok_or_else(|| AggrError::BuildTx("route has no hops".into()))?;
        let params = SwapParams {
            deadline: wallet.valid_until,
            recipient: wallet.address.clone(),
            referral: None,
        };
        let query_id = query_id(wallet);
        let fee = self.fee_estimate(route);
        let amount = route.input_amount();

        match route.offer_asset() {
            Some(AssetId::Native) => {
                let body = NativeSwap {
                    op: OP_NATIVE_SWAP,
                    query_id,
                    amount,
                    step,
                    params,
                };
                Ok(OutMessage {
                    destination: route.quote.entry_address.clone(),
                    value: amount + fee,
                    body: encode(&body)?,
                })
            }
            Some(AssetId::Jetton(_)) => {
                let holding = wallet.offer_holding.as_ref().ok_or_else(|| {
                    AggrError::BuildTx("jetton offer without a jetton wallet".into())
                })?;
                let forward = JettonSwapPayload {
                    op: OP_JETTON_SWAP,
                    step,
                    params,
                };
                let forward_ton_amount = fee - self.settings.jetton_transfer_gas;
                let transfer = JettonTransfer {
                    op: OP_JETTON_TRANSFER,
                    query_id,
                    amount,
                    destination: route.quote.entry_address.clone(),
                    response_destination: wallet.address.clone(),
                    forward_ton_amount,
                    forward_payload: encode(&forward)?,
                };
                Ok(OutMessage {
                    destination: holding.wallet_address.clone(),
                    value: fee,
                    body: encode(&transfer)?,
                })
            }
            None => Err(AggrError::BuildTx("route has no offer asset".into())),
        }
    }
}

#[derive(Debug, Serialize)]
struct PlanRequest {
    from: String,
    to: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub pool: PlanPool,
    pub asset_in: String,
    pub asset_out: String,
    pub amount_in: String,
    pub amount_out: String,
}

#[derive(Debug, Deserialize)]
pub struct PlanPool {
    pub address: String,
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub reserves: Vec<String>,
}

/// One link of the on-chain swap chain; `next` continues into the following pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapStep {
    pub pool: String,
    pub limit: u128,
    pub next: Option<Box<SwapStep>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapParams {
    pub deadline: u32,
    pub recipient: String,
    pub referral: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeSwap {
    pub op: u32,
    pub query_id: u64,
    pub amount: u128,
    pub step: SwapStep,
    pub params: SwapParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JettonSwapPayload {
    pub op: u32,
    pub step: SwapStep,
    pub params: SwapParams,
}

fn asset_to_api(asset: &AssetId) -> String {
    asset.to_string()
}

fn asset_from_api(value: &str) -> Result<AssetId, AggrError> {
    value
        .parse()
        .map_err(|e: String| AggrError::Decode(format!("dedust asset: {e}")))
}

/// Fold hop instructions into the nested step chain, innermost hop last.
fn swap_steps(hops: &[HopInstruction]) -> Option<SwapStep> {
    hops.iter().rev().fold(None, |next, hop| {
        Some(SwapStep {
            pool: hop.pool.clone(),
            limit: hop.min_amount_out,
            next: next.map(Box::new),
        })
    })
}

/// Pick the plan with the largest final output and turn it into a quote.
pub fn quote_from_plans(
    backend: &BackendId,
    pair: &AssetPair,
    plans: Vec<Vec<PlanStep>>,
) -> Result<Quote, AggrError> {
    let mut best: Option<(u128, Vec<PoolHop>, f64)> = None;

    for plan in plans {
        if plan.is_empty() {
            continue;
        }
        let mut hops = Vec::with_capacity(plan.len());
        let mut impacts = Vec::with_capacity(plan.len());
        for step in &plan {
            let amount_in = parse_units("amountIn", &step.amount_in)?;
            let amount_out = parse_units("amountOut", &step.amount_out)?;
            let asset_in = asset_from_api(&step.asset_in)?;
            let asset_out = asset_from_api(&step.asset_out)?;
            let Some(impact) = step_impact(step, amount_in) else {
                debug!(pool = %step.pool.address, "plan skipped: pool reserves unknown");
                impacts.clear();
                break;
            };
            impacts.push(impact);
            hops.push(PoolHop {
                pool: step.pool.address.clone(),
                asset_in,
                asset_out,
                amount_in,
                amount_out,
            });
        }
        if impacts.len() != plan.len() {
            continue;
        }
        let output = hops.last().map_or(0, |h| h.amount_out);
        if best.as_ref().map_or(true, |(o, _, _)| output > *o) {
            best = Some((output, hops, compound_impact(impacts)));
        }
    }

    let (output_amount, path, price_impact) =
        best.ok_or_else(|| AggrError::Provider(format!("dedust has no route for {pair}")))?;
    let input_amount = path.first().map_or(0, |h| h.amount_in);

    Ok(Quote {
        backend: backend.clone(),
        input_amount,
        output_amount,
        price_impact,
        valid_until: Utc::now(),
        entry_address: String::new(),
        path,
    })
}

/// Impact of one hop from the input-side reserve; `None` when the pool does not report it.
fn step_impact(step: &PlanStep, amount_in: u128) -> Option<f64> {
    step
        .pool
        .assets
        .iter()
        .position(|a| a == &step.asset_in)
        .and_then(|i| step.pool.reserves.get(i))
        .and_then(|r| r.parse::<u128>().ok())
        .map(|reserve| constant_product_impact(amount_in, reserve))
}
