// toncenter transport
// JSON-RPC (v2) for message submission and wallet getters, index REST (v3)
// for transaction lookup by message hash and jetton wallet discovery

use crate::errors::AggrError;
use crate::metrics::{REQ_ERRORS, REQ_LATENCY};
use crate::model::TxHash;
use crate::router::builder::OfferHolding;
use crate::signing::SignedMessage;
use crate::transport::{Ledger, LedgerStatus};
use crate::venues::adapter::parse_units;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct Toncenter {
    http: Client,
    rpc_url: Url,
    index_url: Url,
    api_key: Option<String>,
}

impl Toncenter {
    /// `rpc_url` is the v2 `jsonRPC` endpoint, `index_url` the v3 base (ending in `/`).
    pub fn new(
        rpc_url: Url,
        index_url: Url,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .context("build toncenter http client")?;
        Ok(Self {
            http,
            rpc_url,
            index_url,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.rpc_url
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<Value, AggrError> {
        let started = Instant::now();
        let result = self.call_inner(method, params).await;
        REQ_LATENCY
            .with_label_values(&["toncenter", method])
            .observe(started.elapsed().as_secs_f64());
        if result.is_err() {
            REQ_ERRORS.with_label_values(&["toncenter", method]).inc();
        }
        result
    }

    async fn call_inner(&self, method: &str, params: Value) -> Result<Value, AggrError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let mut req = self.http.post(self.rpc_url.clone()).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.header("X-API-Key", key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AggrError::Transport(format!("jsonrpc send: {e}")))?;
        if !resp.status().is_success() {
            return Err(AggrError::Provider(format!("http {}", resp.status())));
        }
        let body: Value = resp.json().await?;
        rpc_result(body)
    }

    async fn index_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &'static str,
        query: &[(&str, &str)],
    ) -> Result<T, AggrError> {
        let url = self
            .index_url
            .join(path)
            .map_err(|e| AggrError::Provider(format!("index url: {e}")))?;
        let started = Instant::now();
        let mut req = self.http.get(url).query(query);
        if let Some(key) = &self.api_key {
            req = req.header("X-API-Key", key);
        }
        let result = async {
            let resp = req.send().await?;
            if !resp.status().is_success() {
                return Err(AggrError::Provider(format!("{path} http {}", resp.status())));
            }
            Ok(resp.json::<T>().await?)
        }
        .await;
        REQ_LATENCY
            .with_label_values(&["toncenter", path])
            .observe(started.elapsed().as_secs_f64());
        if result.is_err() {
            REQ_ERRORS.with_label_values(&["toncenter", path]).inc();
        }
        result
    }

    /// Wallet seqno; an undeployed wallet reports zero.
    pub async fn seqno(&self, address: &str) -> Result<u32, AggrError> {
        let result = self
            .call(
                "runGetMethod",
                json!({ "address": address, "method": "seqno", "stack": [] }),
            )
            .await?;
        parse_seqno(&result)
    }

    pub async fn balance(&self, address: &str) -> Result<u128, AggrError> {
        let result = self
            .call("getAddressBalance", json!({ "address": address }))
            .await?;
        match &result {
            Value::String(s) => parse_units("balance", s),
            Value::Number(n) => parse_units("balance", &n.to_string()),
            other => Err(AggrError::Decode(format!("balance: unexpected {other}"))),
        }
    }

    pub async fn jetton_wallet(
        &self,
        owner: &str,
        master: &str,
    ) -> Result<Option<OfferHolding>, AggrError> {
        let resp: JettonWalletsResp = self
            .index_get(
                "jetton/wallets",
                &[("owner_address", owner), ("jetton_address", master), ("limit", "1")],
            )
            .await?;
        resp.jetton_wallets
            .into_iter()
            .next()
            .map(|w| {
                Ok(OfferHolding {
                    balance: parse_units("jetton balance", &w.balance)?,
                    wallet_address: w.address,
                })
            })
            .transpose()
    }
}

#[async_trait]
impl Ledger for Toncenter {
    #[tracing::instrument(skip_all, fields(hash = %signed.hash))]
    async fn submit(&self, signed: &SignedMessage) -> Result<TxHash, AggrError> {
        let result = self
            .call("sendBocReturnHash", json!({ "boc": signed.envelope_b64() }))
            .await?;
        let hash = result
            .get("hash")
            .and_then(Value::as_str)
            .map(|h| TxHash(h.to_string()))
            .unwrap_or_else(|| signed.hash.clone());
        debug!(tx_hash = %hash, "message accepted by toncenter");
        Ok(hash)
    }

    async fn status(&self, tx_hash: &TxHash) -> Result<LedgerStatus, AggrError> {
        let resp: TransactionsResp = self
            .index_get(
                "transactionsByMessage",
                &[("msg_hash", tx_hash.0.as_str()), ("direction", "in")],
            )
            .await?;
        Ok(status_from_transactions(&resp))
    }
}

fn rpc_result(body: Value) -> Result<Value, AggrError> {
    if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
        return Err(AggrError::Provider(err.to_string()));
    }
    if body.get("ok").and_then(Value::as_bool) == Some(false) {
        return Err(AggrError::Provider(body.to_string()));
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| AggrError::Decode("jsonrpc response without result".into()))
}

fn parse_seqno(result: &Value) -> Result<u32, AggrError> {
    let exit_code = result.get("exit_code").and_then(Value::as_i64).unwrap_or(0);
    if exit_code != 0 {
        warn!(exit_code, "seqno getter failed; treating wallet as undeployed");
        return Ok(0);
    }
    let raw = result
        .get("stack")
        .and_then(|s| s.get(0))
        .and_then(|entry| entry.get(1))
        .and_then(Value::as_str)
        .ok_or_else(|| AggrError::Decode(format!("seqno stack: {result}")))?;
    let digits = raw.trim_start_matches("0x");
    u32::from_str_radix(digits, 16).map_err(|e| AggrError::Decode(format!("seqno {raw:?}: {e}")))
}

fn status_from_transactions(resp: &TransactionsResp) -> LedgerStatus {
    let Some(tx) = resp.transactions.first() else {
        return LedgerStatus::Pending;
    };
    let d = &tx.description;
    let compute_ok = d.compute_ph.as_ref().map_or(true, |c| c.success.unwrap_or(true));
    let action_ok = d.action.as_ref().map_or(true, |a| a.success.unwrap_or(true));
    let success = !d.aborted && compute_ok && action_ok;
    let reason = (!success).then(|| {
        let exit_code = d.compute_ph.as_ref().and_then(|c| c.exit_code);
        match exit_code {
            Some(code) => format!("transaction aborted (exit code {code})"),
            None => "transaction aborted".to_string(),
        }
    });
    LedgerStatus::Included {
        success,
        settled_amount: None,
        reason,
    }
}

#[derive(Debug, Deserialize)]
struct JettonWalletsResp {
    #[serde(default)]
    jetton_wallets: Vec<JettonWalletEntry>,
}

#[derive(Debug, Deserialize)]
struct JettonWalletEntry {
    address: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct TransactionsResp {
    #[serde(default)]
    transactions: Vec<IndexedTransaction>,
}

#[derive(Debug, Deserialize)]
struct IndexedTransaction {
    #[serde(default)]
    description: TxDescription,
}

#[derive(Debug, Default, Deserialize)]
struct TxDescription {
    #[serde(default)]
    aborted: bool,
    #[serde(default)]
    compute_ph: Option<ComputePhase>,
    #[serde(default)]
    action: Option<ActionPhase>,
}

#[derive(Debug, Deserialize)]
struct ComputePhase {
    success: Option<bool>,
    exit_code: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ActionPhase {
    success: Option<bool>,
}
