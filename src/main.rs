//! karst - single-node S3-compatible object storage server

use axum::middleware;
use axum::response::IntoResponse;
use clap::{Parser, Subcommand};
use karst::api::auth::{sigv4_auth_middleware, AuthConfig};
use karst::api::handlers::{router, AppState};
use karst::api::S3Error;
use karst::config::{Config, LogFormat};
use karst::engine::StorageEngine;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Version string including build timestamp for --version output
fn version_long() -> &'static str {
    // e.g. "0.3.2 (built 2026-07-30T09:12:44Z)"
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("KARST_BUILD_TIME"),
        )
    })
}

/// karst: single-node S3-compatible object storage
#[derive(Parser, Debug)]
#[command(name = "karst")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the S3 server
    Server(ServerArgs),
    /// Print version and build time
    Version,
    /// Print the resolved configuration as YAML
    Config(ServerArgs),
}

#[derive(clap::Args, Debug, Default)]
struct ServerArgs {
    /// Path to YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Listen port (overrides the address's port)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Data directory for object blobs (overrides config)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<String>,

    /// Metadata store file (overrides config)
    #[arg(long, value_name = "FILE")]
    metadata_path: Option<String>,

    /// S3 access key id (overrides config)
    #[arg(long, value_name = "KEY")]
    access_key: Option<String>,

    /// S3 secret access key (overrides config)
    #[arg(long, value_name = "SECRET")]
    secret_key: Option<String>,

    /// Log level: debug, info, warn, error
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log format: text or json
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,
}

impl ServerArgs {
    /// Flags beat environment beats file beats defaults.
    fn resolve_config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(ref addr) = self.listen {
            config.listen_addr = addr.parse()?;
        }
        if let Some(port) = self.port {
            config.listen_addr.set_port(port);
        }
        if let Some(ref dir) = self.data_dir {
            config.data_dir = dir.into();
        }
        if let Some(ref path) = self.metadata_path {
            config.metadata_path = Some(path.into());
        }
        if let Some(ref key) = self.access_key {
            config.access_key_id = Some(key.clone());
        }
        if let Some(ref secret) = self.secret_key {
            config.secret_access_key = Some(secret.clone());
        }
        if let Some(ref level) = self.log_level {
            config.log_level = level.clone();
        }
        match self.log_format.as_deref() {
            Some("json") => config.log_format = LogFormat::Json,
            Some("text") => config.log_format = LogFormat::Text,
            Some(other) => return Err(format!("unknown log format: {other}").into()),
            None => {}
        }
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Command::Version) => {
            println!("karst {}", version_long());
            Ok(())
        }
        Some(Command::Config(args)) => match args.resolve_config() {
            Ok(config) => {
                match serde_yaml::to_string(&config) {
                    Ok(yaml) => {
                        print!("{yaml}");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e),
        },
        Some(Command::Server(args)) => run_server(args),
        None => run_server(ServerArgs::default()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.resolve_config()?;

    // Explicit runtime builder instead of `#[tokio::main]` so the blocking
    // pool size can come from config; the default 512 threads is excessive
    // for a single-node store.
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(bt) = config.blocking_threads {
        runtime_builder.max_blocking_threads(bt);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // Log filter priority: RUST_LOG > KARST_LOG_LEVEL (already folded into
    // config) > config file > default.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("karst={},tower_http=warn", config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!(
        "Starting karst v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("KARST_BUILD_TIME"),
    );
    info!("  Listen address: {}", config.listen_addr);
    info!("  Data directory: {:?}", config.data_dir);
    info!("  Metadata store: {:?}", config.metadata_path());
    info!("  Region: {}", config.region);

    if config.auth_enabled() {
        info!(
            "  Authentication: SigV4 ENABLED (access key: {})",
            config.access_key_id.as_deref().unwrap_or("")
        );
    } else {
        warn!("  Authentication: DISABLED (open access); set KARST_ACCESS_KEY_ID and KARST_SECRET_ACCESS_KEY to enable");
    }

    let engine = StorageEngine::open(&config.data_dir, &config.metadata_path()).await?;

    let state = Arc::new(AppState {
        engine,
        region: config.region.clone(),
    });

    // Build auth config (None when credentials are absent or disabled)
    let auth_config: Option<Arc<AuthConfig>> = if config.auth_enabled() {
        Some(Arc::new(AuthConfig {
            access_key_id: config.access_key_id.clone().unwrap_or_default(),
            secret_access_key: config.secret_access_key.clone().unwrap_or_default(),
        }))
    } else {
        None
    };

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        // Every response carries a request id for log correlation.
        .layer(middleware::from_fn(request_id_middleware))
        // SigV4 authentication (no-op when auth_config is None)
        .layer(middleware::from_fn(sigv4_auth_middleware))
        .layer(axum::Extension(auth_config))
        // Handler panics become InternalError responses, never dropped
        // connections.
        .layer(CatchPanicLayer::custom(handle_panic));

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("karst listening on http://{}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Stamp responses that don't already carry a request id.
async fn request_id_middleware(
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut response = next.run(request).await;
    if !response.headers().contains_key("x-amz-request-id") {
        let id = uuid::Uuid::new_v4().to_string();
        if let Ok(v) = id.parse() {
            response.headers_mut().insert("x-amz-request-id", v);
        }
    }
    response
}

/// Panic recovery: log the payload, answer with the S3 InternalError body.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    error!(panic = %detail, "handler panicked");
    S3Error::InternalError.into_response()
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
