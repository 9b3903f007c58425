use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use think_proxy::{build_router, AppState, ProxyConfig, SharedLogger};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "think-proxy",
    about = "OpenAI-compatible chat proxy with model fallback and reasoning folding",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream preset name (overrides config)
    #[arg(long)]
    preset: Option<String>,

    /// Request journal path (JSONL)
    #[arg(long, default_value = "think-proxy.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "think_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. think-proxy.toml (current directory)");
        println!("  2. $XDG_CONFIG_HOME/think-proxy/config.toml");
        println!("  3. ~/.config/think-proxy/config.toml");
        println!("  4. ~/.think-proxy.toml");
        println!("Environment: PORT, UPSTREAM_BASE_URL, <upstream.api_key_env>");
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;
    if let Some(ref preset) = cli.preset {
        config.use_preset(preset)?;
    }
    config.apply_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate()?;

    let logger = SharedLogger::new(&cli.log_file)?;
    let base_url = config.effective_base_url()?;

    info!("think-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:   {}", base_url);
    info!("  Candidates: {}", config.models.candidates.join(" -> "));
    info!("  Advertised: {}", config.models.advertised);
    info!(
        "  Reasoning:  display={} thinking={}",
        config.features.reasoning_display, config.features.thinking_mode
    );
    info!("  Timeout:    {}s per attempt", config.upstream.timeout_secs);
    info!("  Log file:   {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting think-proxy base_url={} port={} candidates={}",
            base_url,
            config.port,
            config.models.candidates.len()
        ),
    );

    // Per-attempt timeouts live in the proxy; a client-wide one would cut long streams.
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        client,
        logger,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OpenAI base URL for clients: http://localhost:{}/v1", port);

    axum::serve(listener, app).await?;

    Ok(())
}
