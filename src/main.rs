//! hmvc-router binary.
//!
//! `serve` runs the HTTP front controller; `run` dispatches one request
//! described by `--uri/--method/--get/--post` options and prints the raw
//! response.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use hmvc_router::config::watcher::ConfigWatcher;
use hmvc_router::config::{load_config, AppConfig, CacheBackend, CacheConfig};
use hmvc_router::dispatch::{Controller, ControllerRegistry, Dispatcher, Exchange, HttpExternalClient};
use hmvc_router::error::HandlerResult;
use hmvc_router::http::{CliOptions, HttpServer, RequestContext, ServerEnvironment};
use hmvc_router::lifecycle::Shutdown;
use hmvc_router::observability::{logging, metrics};
use hmvc_router::routing::{FileCache, MemoryCache, Route, RouteCache, RouteError, RouteParams, RouteTable};

#[derive(Parser)]
#[command(name = "hmvc-router")]
#[command(about = "HMVC request router and dispatcher", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Dispatch one request and print the raw response
    Run {
        /// Request options: --uri=... --method=... --get=... --post=...
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

/// Built-in controller answering the default route.
struct Welcome;

#[async_trait]
impl Controller for Welcome {
    fn actions(&self) -> &[&'static str] {
        &["index"]
    }

    async fn action(
        &mut self,
        _name: &str,
        _args: &RouteParams,
        exchange: &mut Exchange<'_>,
    ) -> HandlerResult {
        exchange.response.set_body("hello, world!");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    logging::init_logging(&config.observability)?;

    tracing::info!("hmvc-router v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        base_url = %config.application.base_url,
        routes = config.routes.len(),
        cache_enabled = config.cache.enabled,
        "Configuration loaded"
    );

    let cache = route_cache(&config.cache);
    let table = build_routes(&config, cache.as_deref()).await?;

    let mut controllers = ControllerRegistry::new();
    controllers.register("welcome", |_| Box::new(Welcome));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(ArcSwap::from_pointee(table)),
        Arc::new(controllers),
        Arc::new(HttpExternalClient::new(&config.external)?),
        config.application.clone(),
    ));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, cli.config, dispatcher).await,
        Commands::Run { args } => run_once(&dispatcher, &args).await,
    }
}

fn route_cache(config: &CacheConfig) -> Option<Box<dyn RouteCache>> {
    if !config.enabled {
        return None;
    }
    let cache: Box<dyn RouteCache> = match config.backend {
        CacheBackend::Memory => Box::new(MemoryCache::new()),
        CacheBackend::File => Box::new(FileCache::new(&config.path)),
    };
    Some(cache)
}

/// Configured routes, or the cached table when one is available.
async fn build_routes(
    config: &AppConfig,
    cache: Option<&dyn RouteCache>,
) -> Result<RouteTable, RouteError> {
    let mut table = if config.routes.is_empty() {
        let mut table = RouteTable::new();
        table.set(
            "default",
            Route::new("(<controller>(/<action>(/<id>)))")?
                .with_defaults([("controller", "welcome"), ("action", "index")]),
        );
        table
    } else {
        RouteTable::from_config(config.route_configs())?
    };

    if let Some(cache) = cache {
        let timeout = Duration::from_millis(config.cache.timeout_ms);
        if table.restore_from_cache(cache, timeout).await {
            tracing::info!(routes = table.len(), "Routes restored from cache");
        } else if let Err(e) = table
            .serialize_to_cache(cache, Duration::from_secs(config.cache.ttl_secs))
            .await
        {
            tracing::warn!(error = %e, "Failed to save routes to cache");
        }
    }

    Ok(table)
}

async fn serve(
    config: AppConfig,
    config_path: Option<PathBuf>,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    // the watcher handle must outlive the server
    let (_watcher, updates) = match config_path.map(|path| ConfigWatcher::new(&path)) {
        Some((watcher, rx)) => match watcher.run() {
            Ok(handle) => (Some(handle), Some(rx)),
            Err(e) => {
                tracing::warn!(error = %e, "Config watcher unavailable, routes will not reload");
                (None, None)
            }
        },
        None => (None, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    HttpServer::new(&config.listener, dispatcher)
        .run(listener, &shutdown, updates)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_once(dispatcher: &Dispatcher, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let env = ServerEnvironment {
        headless: Some(CliOptions::parse(args)),
        ..ServerEnvironment::default()
    };
    let request = RequestContext::from_environment(&env, dispatcher.app(), None)?;

    let (response, error) = match dispatcher.dispatch(request).await {
        Ok(response) => (response, None),
        Err(failure) => (failure.response, Some(failure.error)),
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response.render())?;
    writeln!(stdout)?;

    match error {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}
