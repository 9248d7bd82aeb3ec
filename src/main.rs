use anyhow::{Context, Result};
use clap::Parser;
use mediator_core::authority::{AuthorityChannel, ChannelAuthority, NatsAuthority, ServerEvent};
use mediator_core::capture::{CaptureSource, WavFileCapture};
use mediator_core::clock::SystemClock;
use mediator_core::conversation::{ConversationCore, CoreParts};
use mediator_core::leadership::{BusFactory, LocalBusHub, NatsBusFactory};
use mediator_core::recovery::{FileInfoStore, MemoryInfoStore, RecoveryOffer, SessionInfoStore};
use mediator_core::{create_router, AppState, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mediator-core", version, about = "Turn-taking core for mediated conversations")]
struct Args {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/mediator-core")]
    config: String,

    /// Host a new session under this name
    #[arg(long, conflicts_with = "join")]
    create: Option<String>,

    /// Join the session with this code
    #[arg(long, requires = "name")]
    join: Option<String>,

    /// Display name when joining
    #[arg(long)]
    name: Option<String>,

    /// Rejoin a recoverable session without asking
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Discard any recoverable session
    #[arg(long)]
    fresh: bool,

    /// Use a WAV file as the microphone
    #[arg(long)]
    capture_wav: Option<PathBuf>,

    /// Run against an in-memory authority instead of NATS
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("Mediator core v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let clock = Arc::new(SystemClock);
    let client_id = cfg
        .authority
        .client_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let info_store: Arc<dyn SessionInfoStore> = match &cfg.recovery.storage_dir {
        Some(dir) => {
            info!("Session info stored in {}", dir.display());
            Arc::new(FileInfoStore::new(dir))
        }
        None => Arc::new(MemoryInfoStore::new()),
    };

    let (authority, bus_factory, events): (
        Arc<dyn AuthorityChannel>,
        Arc<dyn BusFactory>,
        mpsc::Receiver<ServerEvent>,
    ) = match (&cfg.authority.nats_url, args.offline) {
        (Some(url), false) => {
            let authority = NatsAuthority::connect(url, client_id).await?;
            let events = authority.subscribe_events().await?;
            let bus = NatsBusFactory::new(authority.nats(), cfg.leadership.profile_id.clone());
            (Arc::new(authority), Arc::new(bus), events)
        }
        _ => {
            warn!("No authority configured; requests are only logged");
            let (authority, mut requests) = ChannelAuthority::new();
            let (events_tx, events) = mpsc::channel(1);
            tokio::spawn(async move {
                let _events_tx = events_tx;
                while let Some(request) = requests.recv().await {
                    info!("Offline request: {}", request.name());
                }
            });
            (Arc::new(authority), Arc::new(LocalBusHub::new()), events)
        }
    };

    let capture = args.capture_wav.as_ref().map(|path| {
        info!("Capturing from {}", path.display());
        Box::new(WavFileCapture::new(path)) as Box<dyn CaptureSource>
    });

    let core = ConversationCore::new(
        CoreParts {
            authority,
            bus_factory,
            info_store,
            capture,
            clock,
        },
        cfg.core_settings(),
    );

    match core.check_recovery()? {
        RecoveryOffer::Offer(offer) if args.resume => {
            info!("Resuming session {}", offer.session_code);
            core.reconnect().await?;
        }
        RecoveryOffer::Offer(_) if args.fresh => core.start_fresh().await?,
        RecoveryOffer::Offer(offer) => info!(
            "Session {} can be resumed (--resume or POST /recovery/reconnect)",
            offer.session_code
        ),
        RecoveryOffer::Nothing => {}
    }

    if let Some(host_name) = &args.create {
        core.create_session(host_name, None).await?;
    } else if let (Some(code), Some(name)) = (&args.join, &args.name) {
        core.join_session(code, name).await?;
    }

    let runner = {
        let core = core.clone();
        tokio::spawn(async move { core.run(events).await })
    };

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, create_router(AppState::new(core.clone())))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    runner.abort();
    core.shutdown().await;

    Ok(())
}
