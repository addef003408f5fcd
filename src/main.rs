use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use switchboard::{build_router, AppState, GatewayConfig, SharedLog};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "switchboard",
    about = "Anthropic-compatible gateway: serve /v1/messages on top of any OpenAI-style backend",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend name (overrides config)
    #[arg(long)]
    backend: Option<String>,

    /// Request log file path
    #[arg(long, default_value = "switchboard.log")]
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
                .unwrap_or_else(|_| "switchboard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. switchboard.toml (current directory)");
        if cfg!(target_os = "macos") {
            println!("  2. ~/Library/Application Support/switchboard/config.toml");
        } else {
            println!("  2. $XDG_CONFIG_HOME/switchboard/config.toml");
            println!("     ~/.config/switchboard/config.toml");
        }
        println!("  3. ~/.switchboard.toml");
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref backend) = cli.backend {
        config.backend.name = backend.clone();
        if let Some(preset) = switchboard::backends::BackendPreset::from_name(backend) {
            if config.backend.base_url.is_none() {
                config.backend.base_url = Some(preset.base_url.to_string());
            }
            config.backend.api_key_env = preset.default_api_key_env.to_string();
        }
    }

    let log = SharedLog::new(&cli.log_file)?;

    // Validate config eagerly
    let base_url = config.effective_base_url()?;
    let protocol = config.wire_protocol()?;
    let _api_key = config.resolve_api_key()?;

    info!("╔═══════════════════════════════════════════════════════╗");
    info!("║           switchboard v{}                   ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════════╝");
    info!("  Backend:   {}", config.backend.name);
    info!("  Base URL:  {}", base_url);
    info!("  Protocol:  {}", protocol);
    info!("  Port:      {}", config.port);
    info!("  Models:    {} mapped", config.models.len());
    info!("  Log file:  {}", cli.log_file.display());

    log.info(
        "startup",
        format!(
            "Starting switchboard backend={} protocol={} base_url={} port={}",
            config.backend.name, protocol, base_url, config.port
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        log: log.clone(),
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  To use with an Anthropic client:");
    info!("    ANTHROPIC_BASE_URL=http://localhost:{}", config.port);
    info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
