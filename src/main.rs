use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use http::{Method, header::CONTENT_TYPE};
use tokio::net::TcpListener;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use anyhow::anyhow;

use speech_relay::{ServerConfig, routes, state::AppState};

/// Speech relay - streams client audio to Deepgram
#[derive(Parser, Debug)]
#[command(name = "speech-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate the configuration, print the effective settings and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing; honours RUST_LOG
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    // The relay cannot serve anything without upstream credentials
    config
        .require_deepgram_api_key()
        .map_err(|e| anyhow!(e.to_string()))?;

    if let Some(Commands::CheckConfig) = cli.command {
        print_effective_config(&config);
        return Ok(());
    }

    let address = config.address();
    let tls_config = config.tls.clone();
    let is_tls_enabled = config.is_tls_enabled();
    let rate_limit_rps = config.rate_limit_requests_per_second;
    let rate_limit_burst = config.rate_limit_burst_size;
    let cors_origins = config.cors_allowed_origins.clone();
    let grace = config.shutdown_grace();
    println!("Starting server on {address}");

    // Create application state
    let app_state = AppState::new(config).map_err(|e| anyhow!(e.to_string()))?;

    // Configure rate limiting (disabled when rate >= 100000 for performance testing)
    let governor_layer = if rate_limit_rps < 100000 {
        let governor_config = GovernorConfigBuilder::default()
            .per_second(rate_limit_rps as u64)
            .burst_size(rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("Failed to build rate limiter config"))?;
        Some(GovernorLayer::new(governor_config))
    } else {
        println!("Rate limiting disabled (rate >= 100000/s)");
        None
    };

    // Configure CORS
    let cors_layer = if let Some(ref origins) = cors_origins {
        if origins == "*" {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE])
                .allow_credentials(false)
        } else {
            // Parse comma-separated origins
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE])
                .allow_credentials(true)
        }
    } else {
        info!(
            "CORS not configured, defaulting to same-origin only. \
             Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
        );
        CorsLayer::new()
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE])
            .allow_credentials(false)
    };

    // Security headers
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app = routes::create_router(app_state.clone())
        .layer(cors_layer)
        .layer(tower::util::option_layer(governor_layer))
        .layer(security_headers);

    // Parse socket address
    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    // Start server with or without TLS
    if is_tls_enabled {
        let tls = tls_config.ok_or_else(|| anyhow!("TLS enabled without certificate paths"))?;

        // Load TLS configuration from certificate and key files
        let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|e| {
                anyhow!(
                    "Failed to load TLS certificates from {} and {}: {}",
                    tls.cert_path.display(),
                    tls.key_path.display(),
                    e
                )
            })?;

        println!("Server listening on https://{} (TLS enabled)", socket_addr);

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let signal_state = app_state.clone();
        tokio::spawn(async move {
            shutdown_signal(signal_state).await;
            shutdown_handle.graceful_shutdown(Some(grace));
        });

        axum_server::bind_rustls(socket_addr, rustls_config)
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|e| anyhow!("TLS server error: {}", e))?;
    } else {
        println!("Server listening on http://{}", socket_addr);

        let listener = TcpListener::bind(&socket_addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(app_state.clone()))
        .await?;
    }

    drain_sessions(&app_state, grace).await
}

/// Wait for SIGINT or SIGTERM, then start draining
///
/// Cancelling the process token closes every session with status 1001. A
/// watchdog forces the process down if sessions outlive the grace period.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    let grace = state.config.shutdown_grace();
    info!(
        active_sessions = state.admission.active(),
        grace_secs = grace.as_secs(),
        "Shutdown signal received, draining sessions"
    );
    state.shutdown.cancel();

    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        let remaining = state.admission.active();
        if remaining > 0 {
            error!(remaining, "Sessions still active after grace period, forcing exit");
            std::process::exit(1);
        }
    });
}

async fn drain_sessions(state: &AppState, grace: std::time::Duration) -> anyhow::Result<()> {
    match tokio::time::timeout(grace, state.admission.wait_idle()).await {
        Ok(()) => {
            info!("All sessions closed, exiting");
            Ok(())
        }
        Err(_) => {
            let remaining = state.admission.active();
            warn!(remaining, "Grace period elapsed with sessions still active");
            Err(anyhow!("{remaining} session(s) still active after shutdown grace period"))
        }
    }
}

fn print_effective_config(config: &ServerConfig) {
    let relay = &config.relay;
    println!("Configuration OK");
    println!("  address:                 {}", config.address());
    println!("  tls:                     {}", config.is_tls_enabled());
    println!("  deepgram url:            {}", config.deepgram_url);
    println!("  deepgram model:          {}", config.deepgram_model);
    println!("  max sessions:            {}", relay.max_sessions);
    println!("  keepalive interval:      {} ms", relay.keepalive_interval_ms);
    println!(
        "  inactivity check:        {} s",
        relay.inactivity_check_interval_secs
    );
    println!("  idle timeout:            {} s", relay.idle_timeout_secs);
    println!("  safety timeout:          {} s", relay.safety_timeout_secs);
    println!(
        "  reconnect backoff:       {} ms base, {} ms cap, {} attempts",
        relay.reconnect_base_delay_ms, relay.reconnect_max_delay_ms, relay.reconnect_max_attempts
    );
    println!(
        "  upstream connect timeout: {} s",
        relay.upstream_connect_timeout_secs
    );
    println!("  shutdown grace:          {} s", relay.shutdown_grace_secs);
}
