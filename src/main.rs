use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::StreamExt;
use loqa_voice_intake::diagnostics::{DiagnosticSink, FanoutSink, TracingSink};
use loqa_voice_intake::extract::{classify_symptom, parse_severity};
use loqa_voice_intake::nats::{NatsClient, NatsDiagnosticSink, SessionUpdateMessage};
use loqa_voice_intake::{
    build_summary, create_router, AppState, Config, EventLog, HttpTranscriptStore, SessionTransport, VoiceSession,
    WebRtcConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "loqa-voice-intake")]
#[command(about = "Realtime voice symptom intake")]
struct Cli {
    /// Config file, without extension
    #[arg(short, long, default_value = "config/voice-intake")]
    config: String,

    /// Log at debug level (includes every data channel message)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API around one voice session
    Serve,

    /// Print the summary of a saved event log (JSON)
    Summarize {
        /// Path to the event log
        log: PathBuf,
    },

    /// Show how an answer would be read by the extractor
    Parse {
        /// Free-form patient answer
        text: String,
    },

    /// Print session updates published on NATS
    Watch {
        /// Session to follow
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let config_path = shellexpand::tilde(&cli.config).into_owned();

    match cli.command {
        Command::Serve => serve(Config::load(&config_path)?).await,
        Command::Summarize { log } => summarize(log),
        Command::Parse { text } => {
            match parse_severity(&text) {
                Some(severity) => println!("severity: {}", severity),
                None => println!("severity: (none)"),
            }
            println!("type: {}", classify_symptom(&text).as_str());
            Ok(())
        }
        Command::Watch { session_id } => watch(Config::load(&config_path)?, session_id).await,
    }
}

async fn serve(cfg: Config) -> Result<()> {
    info!("Loqa Voice Intake v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let session_config = cfg.session_config();
    let session_id = session_config.session_id.clone();

    let nats = match &cfg.nats {
        Some(nats) => match NatsClient::connect(&nats.url, session_id.clone()).await {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("Continuing without NATS: {:#}", e);
                None
            }
        },
        None => None,
    };

    let mut sinks: Vec<Arc<dyn DiagnosticSink>> = vec![Arc::new(TracingSink)];
    if let Some(client) = &nats {
        sinks.push(Arc::new(NatsDiagnosticSink::new(Arc::clone(client))?));
    }
    let diagnostics: Arc<dyn DiagnosticSink> = Arc::new(FanoutSink::new(sinks));

    let transport = Arc::new(SessionTransport::new(
        cfg.transport_config(),
        Arc::new(WebRtcConnector),
        cfg.audio_source()?,
        cfg.audio_backend_config(),
        cfg.level_config(),
    ));
    let store = Arc::new(HttpTranscriptStore::new(
        cfg.persistence.api_url.clone(),
        cfg.persistence.api_token.clone(),
        cfg.request_timeout(),
    ));
    let session = Arc::new(VoiceSession::new(
        session_config,
        transport,
        store.clone(),
        diagnostics,
    ));

    if let Some(client) = nats {
        client.forward_updates(session.subscribe());
    }

    let app = create_router(AppState::new(Arc::clone(&session), store));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP API listening on {}", addr);
    info!("Session {} idle; POST /session/start to connect", session_id);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    session.shutdown().await;
    info!("Session {} closed", session_id);

    Ok(())
}

fn summarize(path: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let log: EventLog = serde_json::from_str(&raw).context("Event log is not valid JSON")?;

    let transcript = log.transcript();
    if transcript.is_empty() {
        println!("Nothing was said in this session.");
        return Ok(());
    }

    println!("{}", build_summary(&transcript).plain_text);
    Ok(())
}

async fn watch(cfg: Config, session_id: String) -> Result<()> {
    let nats = cfg.nats.context("No [nats] section in config")?;
    let client = NatsClient::connect(&nats.url, session_id).await?;
    let mut subscriber = client.subscribe_updates().await?;

    info!("Watching session {} (ctrl-c to stop)", client.session_id());

    loop {
        tokio::select! {
            message = subscriber.next() => {
                let Some(message) = message else { break };
                match serde_json::from_slice::<SessionUpdateMessage>(&message.payload) {
                    Ok(update) => println!("[{}] {} {}", update.timestamp, update.kind, update.payload),
                    Err(e) => warn!("Unreadable message on {}: {}", message.subject, e),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}
