use anyhow::{Context, Result};
use clap::Parser;
use interview_core::collaborators::{Collaborators, HttpBackend};
use interview_core::orchestrator::DEFAULT_SESSION_DURATION;
use interview_core::{AmplitudeSource, Orchestrator, OrchestratorConfig, SessionEvent};
use interview_native_utils::device::available_inputs;
use interview_native_utils::microphone::MicrophoneMonitor;
use interview_service::catalog::MediaCatalog;
use interview_service::config::{Config, EVENT_CHANNEL_SIZE};
use interview_service::console::{ConsoleSpeaker, LoggingStallMonitor, spawn_stdin_feed};
use interview_service::render::ClipPlayer;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
struct Cli {
    /// The interview session to join
    #[arg(required_unless_present = "list_devices")]
    session_id: Option<String>,
    /// Run without a microphone (no silence detection)
    #[arg(long)]
    no_mic: bool,
    /// Input device name, defaults to the host's default input
    #[arg(long)]
    device: Option<String>,
    /// Print the available input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Parse Command-Line Arguments ---
    let args = Cli::parse();

    if args.list_devices {
        println!("{}", available_inputs()?);
        return Ok(());
    }
    let session_id = args
        .session_id
        .context("A session id is required")?;

    // --- 2. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 3. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting interview service...");

    // --- 4. Load Media Catalog ---
    let catalog = MediaCatalog::load(&config.media_catalog_dir)
        .context("Failed to load media catalog")?;
    tracing::info!("Loaded media catalog for {} language(s).", catalog.language_count());

    // --- 5. Initialize Backend Clients ---
    let backend = Arc::new(HttpBackend::new(
        &config.backend_url,
        config.backend_api_key.clone(),
    ));
    let collaborators = Collaborators {
        questions: backend.clone(),
        media: Arc::new(catalog),
        feedback: backend.clone(),
        lifecycle: backend,
        speaker: Arc::new(ConsoleSpeaker),
        stall: Arc::new(LoggingStallMonitor::default()),
    };

    // --- 6. Bootstrap the Session ---
    let orchestrator_config = OrchestratorConfig {
        default_duration: config.session_duration.unwrap_or(DEFAULT_SESSION_DURATION),
        ..OrchestratorConfig::default()
    };
    let mut orchestrator =
        match Orchestrator::bootstrap(&session_id, collaborators, orchestrator_config).await {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                tracing::error!("Could not start session {}, leaving: {}", session_id, e);
                return Err(e.into());
            }
        };

    // --- 7. Wire the Runtime ---
    let (events_tx, events_rx) = tokio::sync::mpsc::channel::<SessionEvent>(EVENT_CHANNEL_SIZE);

    orchestrator
        .subscribe_playback(ClipPlayer::new(config.clip_duration, events_tx.clone()).into_subscriber());
    let _stdin = spawn_stdin_feed(events_tx.clone());

    let interrupt_tx = events_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, ending session");
            let _ = interrupt_tx.send(SessionEvent::EndRequested).await;
        }
    });

    // --- 8. Open the Microphone ---
    let microphone: Option<Box<dyn AmplitudeSource>> = if args.no_mic {
        None
    } else {
        match MicrophoneMonitor::open(args.device.as_deref()) {
            Ok(monitor) => Some(Box::new(monitor)),
            Err(e) => {
                tracing::warn!("Microphone unavailable: {:?}", e);
                None
            }
        }
    };

    // --- 9. Run the Session ---
    orchestrator.start(microphone).await;
    let outcome = orchestrator.run(events_rx).await;
    tracing::info!("Session {} finished: {:?}", session_id, outcome);

    Ok(())
}
