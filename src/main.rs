use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use ton_trade_aggr::config::AppConfig;
use ton_trade_aggr::router::api::create_api_router;
use ton_trade_aggr::router::TradeCoordinator;
use ton_trade_aggr::signing::{Ed25519Signer, TonWallet, WalletProvider};
use ton_trade_aggr::transport::Toncenter;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("initialize tracing subscriber")?;

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal coordinator error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = AppConfig::load().context("load configuration")?;
    let api_addr = config.api_addr()?;

    let toncenter = Arc::new(
        Toncenter::new(
            config.ledger.rpc_endpoint.clone(),
            config.ledger.index_endpoint.clone(),
            config.ledger.api_key.clone(),
            config.ledger_timeout(),
        )
        .context("initialize toncenter client")?,
    );

    let signer = Ed25519Signer::from_hex(&config.wallet.ed25519_secret_hex)
        .map_err(|e| anyhow!("load wallet key: {e}"))?;
    let wallet = Arc::new(TonWallet::new(
        config.wallet.address.clone(),
        config.subwallet_id(),
        signer,
        toncenter.clone(),
    ));

    let backends = Arc::new(config.build_backends().context("configure DEX backends")?);
    let backend_ids: Vec<String> = backends.all().iter().map(|b| b.id().to_string()).collect();

    let coordinator = Arc::new(TradeCoordinator::new(
        backends,
        wallet.clone(),
        toncenter.clone(),
        config.coordinator_settings(),
    ));

    let app = App {
        config: Arc::new(config),
        toncenter,
        wallet,
        coordinator,
        api_addr,
    };
    info!(backends = ?backend_ids, "backends registered");
    app.run().await
}

struct App {
    config: Arc<AppConfig>,
    toncenter: Arc<Toncenter>,
    wallet: Arc<TonWallet>,
    coordinator: Arc<TradeCoordinator>,
    api_addr: SocketAddr,
}

impl App {
    async fn run(self) -> Result<()> {
        match self.wallet.sequence_number().await {
            Ok(seqno) => info!(seqno, "wallet reachable"),
            Err(err) => warn!(error = %err, "wallet seqno probe failed; continuing"),
        }

        info!(
            address = %self.config.wallet.address,
            subwallet_id = self.config.subwallet_id(),
            ledger = %self.toncenter.endpoint(),
            "TON trade coordinator online"
        );

        let api_router = create_api_router(self.coordinator.clone());
        let listener = tokio::net::TcpListener::bind(self.api_addr)
            .await
            .with_context(|| format!("bind API server address {}", self.api_addr))?;
        info!(address = %self.api_addr, "HTTP API server starting");
        let _api_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, api_router).await {
                warn!(error = %e, "API server error");
            }
        });

        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.coordinator.stats().await;
                    info!(
                        total_trades = stats.execution.total_trades,
                        confirmed = stats.execution.confirmed,
                        failed = stats.execution.failed,
                        timed_out = stats.execution.timed_out,
                        success_rate = stats.execution.success_rate,
                        avg_confirmation_ms = ?stats.execution.avg_confirmation_ms,
                        in_flight = stats.in_flight,
                        "coordinator heartbeat"
                    );
                    if !stats.open_breakers.is_empty() {
                        warn!(backends = ?stats.open_breakers, "circuit breakers open");
                    }
                    for trade in self.coordinator.in_flight() {
                        debug!(
                            correlation_id = %trade.correlation_id,
                            pair = %trade.pair,
                            stage = ?trade.stage,
                            "in-flight trade"
                        );
                    }
                }
                res = tokio::signal::ctrl_c() => {
                    if let Err(err) = res {
                        warn!(error = %err, "ctrl_c listener error");
                    }
                    info!(in_flight = self.coordinator.in_flight().len(), "Shutdown signal received, exiting");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn init_tracing() -> Result<()> {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber init: {err}"))
}
