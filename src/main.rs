use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imperium_session::config::{AppConfig, ConfigStore, SideChannelBackend};
use imperium_session::events::EventBus;
use imperium_session::orchestrator::{OrchestratorConfig, SessionOrchestrator, END_REASON_USER};
use imperium_session::session::{
    CreateSessionRequest, HostDescriptor, HttpSignalingClient, Session, SignalingClient,
};
use imperium_session::webrtc::WebRtcTransportFactory;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Imperium session client command line arguments
#[derive(Parser, Debug)]
#[command(name = "imperium-session")]
#[command(version, about = "Remote desktop session client", long_about = None)]
struct CliArgs {
    /// Configuration file (default: ~/Documents/imperium/client.json)
    #[arg(short = 'c', long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Session backend base URL (overrides config)
    #[arg(long, value_name = "URL", global = true)]
    api_url: Option<String>,

    /// Bearer token for the session backend (overrides config)
    #[arg(long, value_name = "TOKEN", global = true)]
    token: Option<String>,

    /// Input side channel backend: peer or socket (overrides config)
    #[arg(long, value_name = "BACKEND", global = true)]
    side_channel: Option<SideChannelBackend>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(
        short = 'l',
        long,
        value_name = "LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format (text, json)
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new session
    Create {
        #[arg(long)]
        host: String,
        #[arg(long)]
        client: String,
        #[arg(long)]
        program: String,
    },
    /// Print a session record
    Get { session_id: String },
    /// End a session
    End {
        session_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Connect to a session and stay connected until Ctrl-C
    Connect {
        session_id: String,
        /// Host address, required by the socket side channel
        #[arg(long, value_name = "IP")]
        host_ip: Option<String>,
        #[arg(long, value_name = "PORT", default_value_t = 8080)]
        host_port: u16,
        #[arg(long, value_name = "NAME", default_value = "host")]
        host_name: String,
        /// Event topics to log, e.g. "session.*" (repeatable)
        #[arg(long = "events", value_name = "TOPIC", default_value = "*")]
        topics: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose, args.log_format);

    tracing::info!("Starting imperium-session v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().unwrap_or_else(ConfigStore::default_path);
    tracing::debug!("Config file: {}", config_path.display());

    let config_store = ConfigStore::new(&config_path).await?;
    config_store.apply_env();

    let mut config = (*config_store.get()).clone();
    apply_cli_overrides(&mut config, &args);

    let signaling: Arc<dyn SignalingClient> = Arc::new(HttpSignalingClient::new(&config.api)?);

    match args.command {
        Command::Create {
            host,
            client,
            program,
        } => {
            let session = signaling
                .create(CreateSessionRequest {
                    host_id: host,
                    client_id: client,
                    program_id: program,
                })
                .await?;
            print_session(&session)?;
        }
        Command::Get { session_id } => {
            let session = signaling.get(&session_id).await?;
            print_session(&session)?;
        }
        Command::End { session_id, reason } => {
            let session = signaling.end(&session_id, reason.as_deref()).await?;
            print_session(&session)?;
        }
        Command::Connect {
            session_id,
            host_ip,
            host_port,
            host_name,
            topics,
        } => {
            let host = host_ip.map(|ip| HostDescriptor::new(host_name, ip, host_port));
            connect(&config, signaling, &session_id, host, topics).await?;
        }
    }

    Ok(())
}

fn apply_cli_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(ref url) = args.api_url {
        config.api.base_url = url.clone();
    }
    if let Some(ref token) = args.token {
        config.api.access_token = Some(token.clone());
    }
    if let Some(backend) = args.side_channel {
        config.side_channel.backend = backend;
    }
}

async fn connect(
    config: &AppConfig,
    signaling: Arc<dyn SignalingClient>,
    session_id: &str,
    host: Option<HostDescriptor>,
    topics: Vec<String>,
) -> anyhow::Result<()> {
    let events = Arc::new(EventBus::new());
    let transports = Arc::new(WebRtcTransportFactory::new(config.webrtc.clone()));
    let orchestrator = SessionOrchestrator::new(
        signaling,
        transports,
        events.clone(),
        OrchestratorConfig::from(config),
    );
    orchestrator.set_host(host);

    // Mirror events to the log
    let mut rx = events.subscribe_topics(topics);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(event = event.event_name(), "{}", json),
                Err(e) => tracing::warn!("Failed to serialize event: {}", e),
            }
        }
    });

    if let Err(e) = orchestrator.load(Some(session_id)).await {
        tracing::error!("Failed to connect: {}", e);
        orchestrator.teardown().await;
        return Err(e.into());
    }

    let mut state = orchestrator.store().subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutdown signal received");
            if let Err(e) = orchestrator.end(Some(END_REASON_USER)).await {
                tracing::error!("{}", e);
            }
        }
        _ = state.wait_for(|s| s.lifecycle.is_terminated()) => {
            tracing::warn!("Session terminated");
        }
    }

    orchestrator.teardown().await;
    if let Some(error) = orchestrator.store().snapshot().last_error {
        anyhow::bail!(error);
    }
    Ok(())
}

fn print_session(session: &Session) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(session)?);
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8, format: LogFormat) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "imperium_session=error,webrtc=error",
        LogLevel::Warn => "imperium_session=warn,webrtc=warn",
        LogLevel::Info => "imperium_session=info,webrtc=warn",
        LogLevel::Verbose => "imperium_session=debug,webrtc=warn",
        LogLevel::Debug => "imperium_session=debug,webrtc=info",
        LogLevel::Trace => "imperium_session=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
