use axum::{routing::get, routing::post, serve, Router};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::Duration;
use tracing::{info, warn};
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

mod adapters;
mod adcert;
mod api;
mod cache;
mod categories;
mod config;
mod currency;
mod errors;
mod exchange;
mod metrics;
mod mock_bidder;
mod openrtb;

use adapters::ortb::OrtbBidder;
use adapters::registry::BidderRegistry;
use adcert::signer::AdCertSigner;
use api::handlers::{handle_ads_cert, handle_openrtb2_auction};
use categories::{CategoryFetcher, FileCategoryFetcher};
use config::Configuration;
use currency::converter::RateConverter;
use exchange::Exchange;
use metrics::TracingMetrics;

#[derive(Clone)]
pub struct AppState {
    pub exchange: Arc<Exchange>,
    pub config: Arc<Configuration>,
    pub signer: Option<Arc<AdCertSigner>>,
}

#[derive(Parser, Debug)]
#[command(author = "whiteCcinn", version = "1.0", about = "An OpenRTB-based auction exchange server")]
struct CliArgs {
    #[arg(short, long, default_value_t = 8000)]
    port: u16,
    #[arg(long, default_value = "logs")]
    log_dir: String,
    #[arg(long, default_value = "static/exchange.json")]
    config: String,
    #[arg(long, default_value_t = 9001)]
    mock_bidder_port: u16,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    // 初始化全局 tracing 日志
    let log_file = rolling::hourly(&args.log_dir, "exchange_log.json");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);
    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().json().with_writer(non_blocking));
    tracing::subscriber::set_global_default(subscriber)
        .expect("Unable to set global tracing subscriber");
    info!("exchange server starting on port {}", args.port);

    // 加载配置；读不到就用内置缺省值跑本地模式
    let cfg = Arc::new(match Configuration::from_file(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("{}; falling back to built-in defaults", e);
            Configuration::default()
        }
    });

    let client = cfg
        .http_client()
        .expect("Unable to build outbound HTTP client");

    // ad-cert 密钥：配置了就必须加载成功
    let signer = cfg.adcert.as_ref().map(|adcert| {
        Arc::new(
            AdCertSigner::from_pem_files(&adcert.pcv, &adcert.private_key, &adcert.public_key)
                .expect("Unable to load ad-cert key material"),
        )
    });

    // 汇率刷新任务
    let converter = cfg.currency.sync_url.as_ref().map(|url| {
        let converter = RateConverter::new(client.clone(), url.clone());
        converter.spawn_refresh_loop(Duration::from_secs(cfg.currency.refresh_interval_secs));
        converter
    });

    let category_fetcher: Arc<dyn CategoryFetcher> = match &cfg.categories.dir {
        Some(dir) => Arc::new(FileCategoryFetcher::load(dir).unwrap_or_else(|e| {
            warn!("category mappings unavailable: {}", e);
            FileCategoryFetcher::empty()
        })),
        None => Arc::new(FileCategoryFetcher::empty()),
    };

    // 启动 Mock bidder 服务器，零配置也能本地完整跑通一场竞价
    let mock_server = tokio::spawn(mock_bidder::start_mock_bidder_server(args.mock_bidder_port));

    let mut builder = BidderRegistry::builder();
    if cfg.adapters.is_empty() {
        builder = builder.register(Arc::new(OrtbBidder::new(
            "mockbidder",
            format!("http://127.0.0.1:{}/bid", args.mock_bidder_port),
        )));
    }
    for (name, adapter_cfg) in &cfg.adapters {
        if adapter_cfg.disabled || adapter_cfg.endpoint.is_empty() {
            continue;
        }
        builder = builder.register(Arc::new(OrtbBidder::new(
            name.clone(),
            adapter_cfg.endpoint.clone(),
        )));
    }
    let registry = builder.build();
    info!("bidder registry initialised with {} adapters", registry.len());

    let exchange = Arc::new(Exchange::new(
        &cfg,
        client,
        registry,
        Arc::new(TracingMetrics),
        converter,
        category_fetcher,
        signer.clone(),
    ));

    let state = Arc::new(AppState {
        exchange,
        config: cfg.clone(),
        signer,
    });

    let exchange_server = tokio::spawn({
        let state = state.clone();
        let port = args.port;
        async move {
            let app = Router::new()
                .route("/openrtb2/auction", post(handle_openrtb2_auction))
                .route("/ads-cert", get(handle_ads_cert))
                .with_state(state);
            let addr = format!("0.0.0.0:{}", port);
            info!("exchange server running at http://{}", addr);
            let listener = TcpListener::bind(&addr).await.unwrap();
            serve(listener, app).await.unwrap();
        }
    });

    signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    info!("Shutting down gracefully...");
    exchange_server.abort();
    mock_server.abort();
    info!("exchange server shut down.");
}
