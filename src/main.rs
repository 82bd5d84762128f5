//! Minelink Demo
//!
//! Drives a scripted three-participant session over the in-memory
//! transport: create, two joins, a reset, the racing first click, chat,
//! flags, and teardown, logging every observable event along the way.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use minelink::{
    BoardConfig, CoordinatorConfig, MemoryHub, PlayerProfile, SessionCoordinator, SessionEvent,
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Minelink v{}", VERSION);
    demo_session().await
}

/// Watch one participant's event stream.
fn watch(label: &'static str, mut events: mpsc::Receiver<SessionEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(peer = label, "{:?}", event);
        }
    });
}

/// Run a scripted session: host + two guests on one in-memory hub.
async fn demo_session() -> anyhow::Result<()> {
    let hub = MemoryHub::new();
    let config = CoordinatorConfig::default();

    let (host, host_events) = SessionCoordinator::spawn(
        hub.endpoint(),
        PlayerProfile::new("Hilda", "#e04040"),
        config.clone(),
    );
    let (ada, ada_events) = SessionCoordinator::spawn(
        hub.endpoint(),
        PlayerProfile::new("Ada", "#40a040"),
        config.clone(),
    );
    let (bram, bram_events) = SessionCoordinator::spawn(
        hub.endpoint(),
        PlayerProfile::new("Bram", "#4040e0"),
        config,
    );

    watch("host", host_events);
    watch("ada", ada_events);
    watch("bram", bram_events);

    info!("=== Creating session ===");
    host.create_session().await?;
    let room = host.local_id().clone();
    info!("room id: {}", room);

    ada.join_session(room.clone()).await?;
    bram.join_session(room.clone()).await?;

    info!("=== Fresh 9x9 board with 10 mines ===");
    host.reset_game(BoardConfig::BEGINNER).await?;

    // Ada clicks before any mine exists: the host decides the field,
    // announces it, and every board converges.
    info!("=== First move ===");
    ada.click_cell(0, 0).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    ada.send_chat("corner looked safe").await?;
    bram.flag_cell(8, 8, true).await?;
    bram.click_cell(4, 4).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let board = host.board().await?;
    info!(
        "host board: phase={:?} revealed={} flagged={} elapsed={}s",
        board.phase,
        board.revealed.len(),
        board.flagged.len(),
        board.elapsed_seconds,
    );
    let roster = host.roster().await?;
    for participant in &roster {
        info!(
            "roster: {} ({}) role={:?}",
            participant.display_name, participant.id, participant.role
        );
    }

    info!("=== Teardown ===");
    ada.leave_session().await?;
    bram.leave_session().await?;
    host.leave_session().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
