//! bbx-billing - entitlement, billing and licensing microservice
//!
//! Default port 5740. Startup order: config -> logging -> root folder ->
//! database -> secrets -> router.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bbx_billing::analytics::AnalyticsRecorder;
use bbx_billing::config::{
    resolve_checkout_redirects, resolve_signature_tolerance, resolve_stripe_secret_key,
    resolve_webhook_secret, CHECKOUT_CANCEL_URL_ENV, CHECKOUT_SUCCESS_URL_ENV,
};
use bbx_billing::entitlements::PlanCatalog;
use bbx_billing::payments::{OfflineProvider, PaymentProvider, StripeProvider};
use bbx_billing::{build_router, AppState, ServiceSettings};
use bbx_common::config::{
    default_config_path, load_toml_config_or_default, CompiledDefaults, LoggingConfig,
    RootFolderInitializer, RootFolderResolver,
};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MODULE_NAME: &str = "bbx-billing";
const PLAY_LOG_PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Command-line arguments for bbx-billing
#[derive(Parser, Debug)]
#[command(name = "bbx-billing")]
#[command(about = "Entitlement, billing and licensing service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides TOML)
    #[arg(short, long, env = "BBX_BILLING_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Root folder for the database and generated documents
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: ~/.config/bbx/bbx-billing.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new(CompiledDefaults::for_current_platform().log_level));

    match &logging.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| default_config_path(MODULE_NAME));
    let toml_config = load_toml_config_or_default(config_path.as_deref());

    init_tracing(&toml_config.logging)?;

    // Build identification first, before any slow startup work
    info!(
        "Starting BBX Billing (bbx-billing) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml(toml_config.clone())
        .resolve();
    info!("Root folder: {}", root_folder.display());

    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db = bbx_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;
    info!("✓ Database ready");

    let catalog = PlanCatalog::from_config(&toml_config.plans).context("Invalid plan catalog")?;
    info!(plans = catalog.plans().count(), "Plan catalog loaded");

    let webhook_secret = resolve_webhook_secret(&db, &toml_config)
        .await
        .context("Failed to resolve webhook secret")?;
    let signature_tolerance_secs = resolve_signature_tolerance(&toml_config)?;

    let provider: Arc<dyn PaymentProvider> = match resolve_stripe_secret_key(&toml_config) {
        Some(key) => {
            let redirects = resolve_checkout_redirects(&toml_config)?.ok_or_else(|| {
                anyhow!(
                    "Payment provider key is set but checkout redirect URLs are not; set {} and {} \
                     (or checkout_success_url / checkout_cancel_url in the TOML config)",
                    CHECKOUT_SUCCESS_URL_ENV,
                    CHECKOUT_CANCEL_URL_ENV
                )
            })?;
            info!(success_url = %redirects.success_url, "Checkout redirects configured");
            Arc::new(StripeProvider::new(key, redirects)?)
        }
        None => {
            warn!("No payment provider key configured; using offline provider");
            Arc::new(OfflineProvider)
        }
    };

    let settings = ServiceSettings {
        catalog,
        licenses_dir: initializer.licenses_dir(),
        feedback_dir: initializer.feedback_dir(),
        webhook_secret,
        signature_tolerance_secs,
    };
    let state = AppState::new(db, settings, provider);
    spawn_play_log_pruning(Arc::clone(&state.analytics));
    let app = build_router(state);

    let port = args
        .port
        .or(toml_config.port)
        .unwrap_or_else(|| CompiledDefaults::for_current_platform().port);
    let addr = SocketAddr::new(args.bind, port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("bbx-billing listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Prune the beat play log at startup and once a day after that
fn spawn_play_log_pruning(analytics: Arc<AnalyticsRecorder>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PLAY_LOG_PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            match analytics.prune_play_log().await {
                Ok(removed) => info!(removed, "Play log pruned"),
                Err(e) => warn!("Play log pruning failed: {}", e),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
