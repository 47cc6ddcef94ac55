use std::{future::IntoFuture, net::SocketAddr, path::Path, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, State},
};
use clap::Parser;
use color_eyre::{Result, eyre::WrapErr};
use hyper::{Request, Response};
use synapse::{
    adapters::{ConfigWatcher, EtcdStore, HealthChecker, HttpClientAdapter, HttpHandler},
    adapters::admin_api::{self, AdminState},
    config::{GatewayConfig, GatewayConfigValidator},
    core::{RouteTable, UpstreamRegistry, middleware},
    tracing_setup,
};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Bootstrap configuration file (TOML, YAML or JSON)
    #[clap(short, long, default_value = "gateway.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate the bootstrap configuration file and exit
    Validate {
        #[clap(short, long, default_value = "gateway.toml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        #[clap(short, long, default_value = "gateway.toml")]
        config: String,
    },
}

fn load_or_default(path: &str) -> Result<GatewayConfig> {
    let config = if Path::new(path).exists() {
        synapse::config::load_config(path)?
    } else {
        GatewayConfig::default()
    };
    GatewayConfigValidator::validate(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => {
            load_or_default(&config)?;
            println!("configuration ok: {config}");
            Ok(())
        }
        Some(Commands::Serve { config }) => run(&config).await,
        None => run(&args.config).await,
    }
}

async fn run(config_path: &str) -> Result<()> {
    let config = load_or_default(config_path)?;
    tracing_setup::init_tracing(&config.log)?;
    tracing::info!(config = config_path, "starting synapse gateway");

    // Failure to reach the store is the one fatal startup error.
    let store = Arc::new(
        EtcdStore::connect(&config.store.endpoints)
            .await
            .wrap_err("failed to connect to config store")?,
    );

    let cancel = CancellationToken::new();
    let table = Arc::new(RouteTable::new());
    let registry = Arc::new(UpstreamRegistry::new());
    let http_client = Arc::new(HttpClientAdapter::new());

    let health = Arc::new(HealthChecker::new(
        Arc::clone(&http_client) as _,
        cancel.child_token(),
    ));
    let watcher = Arc::new(ConfigWatcher::new(
        Arc::clone(&store) as _,
        Arc::clone(&table),
        Arc::clone(&registry),
        Arc::clone(&health),
        cancel.child_token(),
    ));
    watcher
        .start()
        .await
        .wrap_err("failed to start config watcher")?;
    health.start();

    let mut middlewares = vec![
        middleware::recovery(),
        middleware::logger(),
        middleware::request_id(),
        middleware::cors(),
    ];
    if let Some(rl) = &config.rate_limit {
        middlewares.push(middleware::rate_limit(rl.per_second, rl.effective_burst()));
    }
    if let Some(secret) = &config.jwt_secret {
        middlewares.push(middleware::jwt(secret.clone()));
    }

    let handler = Arc::new(HttpHandler::new(
        Arc::clone(&table),
        Arc::clone(&registry),
        Arc::clone(&http_client) as _,
        middleware::Chain::new(middlewares),
    ));

    let admin_router = admin_api::router(Arc::new(AdminState {
        store: store as _,
        table,
        registry,
    }));
    let data_router = Router::new()
        .fallback(dispatch)
        .with_state(handler)
        .into_make_service_with_connect_info::<SocketAddr>();

    let admin_listener = TcpListener::bind(&config.admin_addr)
        .await
        .wrap_err_with(|| format!("failed to bind admin listener on {}", config.admin_addr))?;
    let data_listener = TcpListener::bind(&config.listen_addr)
        .await
        .wrap_err_with(|| format!("failed to bind data listener on {}", config.listen_addr))?;
    tracing::info!(
        data = %config.listen_addr,
        admin = %config.admin_addr,
        "gateway listening"
    );

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("shutting down gateway");
            cancel.cancel();
        }
    });

    let admin = axum::serve(admin_listener, admin_router)
        .with_graceful_shutdown(wait_cancelled(cancel.clone()));
    let data = axum::serve(data_listener, data_router)
        .with_graceful_shutdown(wait_cancelled(cancel.clone()));

    tokio::try_join!(admin.into_future(), data.into_future())?;
    tracing::info!("gateway stopped");
    Ok(())
}

async fn dispatch(
    State(handler): State<Arc<HttpHandler>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response<Body> {
    handler.handle(req, Some(addr)).await
}

async fn wait_cancelled(cancel: CancellationToken) {
    cancel.cancelled().await;
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
