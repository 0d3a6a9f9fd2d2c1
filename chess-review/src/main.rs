//! chess-review: score every move of a game with Stockfish, then browse it.
//!
//! The game is analysed in two passes (a quick preview and a deeper analyse
//! pass), the result is stored under the data directory and the board opens
//! at the move where the evaluation swung the most. From there, commands on
//! stdin move through the game and explore side lines while the engine keeps
//! analysing whatever position is shown.

mod display;
mod input;
mod pgn;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use engine::{find_stockfish_path, EngineWorker, StockfishConfig, StockfishWorker};
use orchestrator::{
    spawn_supervisor, AnalysisStage, GameHeaders, GameStore, JsonGameStore, OrchestratorConfig,
    PlyOrder, SupervisorEvent, SupervisorHandle,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use input::{Input, HELP};

#[derive(Parser)]
#[command(name = "chess-review", about = "Engine review of chess games")]
struct Cli {
    /// JSON configuration file; environment variables still override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Stockfish binary to use instead of searching the usual locations.
    #[arg(long, global = true)]
    stockfish: Option<PathBuf>,

    /// Also log to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse a game and browse it interactively.
    Analyse {
        /// PGN file (tag pairs and movetext).
        #[arg(short, long, conflicts_with = "moves")]
        file: Option<PathBuf>,

        /// Moves as SAN or coordinates, e.g. "e4 e5 Nf3".
        #[arg(short, long)]
        moves: Option<String>,

        #[arg(long)]
        white: Option<String>,

        #[arg(long)]
        black: Option<String>,

        /// Show scores from this player's side.
        #[arg(long)]
        player: Option<String>,

        /// Per-move budget of the preview pass in milliseconds.
        #[arg(long)]
        preview_ms: Option<u64>,

        /// Per-move budget of the analyse pass in milliseconds.
        #[arg(long)]
        analyse_ms: Option<u64>,

        /// Order of the analyse pass: forward or backward.
        #[arg(long)]
        order: Option<PlyOrder>,

        /// Move the board along with the ply being analysed.
        #[arg(long)]
        follow: bool,

        /// Print the scores and exit instead of reading commands.
        #[arg(long)]
        batch: bool,
    },
    /// List stored analyses, newest first.
    List,
    /// Print a stored analysis.
    Show { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose);

    let mut config = match cli.config {
        Some(ref path) => OrchestratorConfig::from_json_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => OrchestratorConfig::from_env(),
    };
    if cli.stockfish.is_some() {
        config.stockfish_path = cli.stockfish.clone();
    }
    tracing::info!(data_dir = %config.data_dir.display(), "chess-review starting");

    let store = JsonGameStore::new(config.data_dir.join("games"));

    match cli.command {
        Commands::Analyse {
            file,
            moves,
            white,
            black,
            player,
            preview_ms,
            analyse_ms,
            order,
            follow,
            batch,
        } => {
            let mut game = match (file, moves) {
                (Some(path), _) => pgn::read_game(&path)?,
                (None, Some(moves)) => pgn::GameRecord {
                    headers: GameHeaders::new("White", "Black"),
                    moves: pgn::movetext_tokens(&moves),
                },
                (None, None) => anyhow::bail!("Give a game with --file or --moves"),
            };
            if let Some(white) = white {
                game.headers.white = white;
            }
            if let Some(black) = black {
                game.headers.black = black;
            }
            if let Some(ms) = preview_ms {
                config.preview.budget_ms = ms;
            }
            if let Some(ms) = analyse_ms {
                config.analyse.budget_ms = ms;
            }
            if let Some(order) = order {
                config.analyse_order = order;
            }
            config.show_board_during_analysis |= follow;

            analyse(config, Arc::new(store), game, player, batch).await?;
        }
        Commands::List => {
            let games = store.list_analysed_games().await?;
            if games.is_empty() {
                println!("No stored analyses in {}", config.data_dir.display());
            }
            for game in games {
                println!(
                    "{}  {} vs {}  {} plies  swing at ply {}",
                    game.id,
                    game.headers.white,
                    game.headers.black,
                    game.moves.len(),
                    game.most_interesting_ply
                );
            }
        }
        Commands::Show { id } => {
            let game = store
                .load_analysed_game(&id)
                .await?
                .with_context(|| format!("No stored analysis with id {}", id))?;
            println!("{}", serde_json::to_string_pretty(&game)?);
        }
    }

    tracing::info!("chess-review shutting down");
    Ok(())
}

fn init_logging(verbose: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = "logs";
    std::fs::create_dir_all(log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(log_dir, "chess-review");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stderr = verbose.then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .with(stderr)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    guard
}

async fn analyse(
    config: OrchestratorConfig,
    store: Arc<dyn GameStore>,
    game: pgn::GameRecord,
    player: Option<String>,
    batch: bool,
) -> anyhow::Result<()> {
    let worker = Arc::new(StockfishWorker::new(StockfishConfig {
        path: find_stockfish_path(config.stockfish_path.as_deref()),
        label: Some("review".into()),
    }));
    if !worker.is_installed() {
        println!("Stockfish not found; install it or pass --stockfish");
    } else if let Err(e) = worker.initialize().await {
        tracing::warn!("Engine failed to start: {}", e);
    }

    let handle = spawn_supervisor(worker, store, config);
    let snap = handle.load_game(game.headers, game.moves).await?;
    println!(
        "{} vs {}, {} plies",
        snap.headers.as_ref().map_or("?", |h| h.white.as_str()),
        snap.headers.as_ref().map_or("?", |h| h.black.as_str()),
        snap.moves.len()
    );
    if player.is_some() {
        let snap = handle.set_active_player(player).await?;
        if let Some(error) = snap.player_error {
            println!("! {}", error);
        }
    }

    let (_, mut events) = handle.subscribe().await?;
    handle.start_analysis().await?;
    wait_for_manual(&mut events).await;

    let snap = handle.get_snapshot().await?;
    print!("{}", display::score_table(&snap));
    if let Some(error) = &snap.last_error {
        println!("! {}", error);
    }

    if !batch {
        println!("{}", display::position_summary(&snap));
        println!("Type 'help' for commands.");
        browse(&handle, &mut events).await?;
    }

    handle.shutdown().await?;
    Ok(())
}

/// Print pipeline progress until the manual stage opens.
async fn wait_for_manual(events: &mut broadcast::Receiver<SupervisorEvent>) {
    loop {
        match events.recv().await {
            Ok(SupervisorEvent::StageChanged(AnalysisStage::Manual)) => return,
            Ok(SupervisorEvent::StageChanged(stage)) => println!("{} pass...", stage),
            Ok(SupervisorEvent::PlyScored { stage, ply, score }) => {
                tracing::debug!(%stage, ply, score = %score.display(), "Scored");
            }
            Ok(SupervisorEvent::Error(message)) => println!("! {}", message),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Read commands from stdin and print engine output as it arrives.
async fn browse(
    handle: &SupervisorHandle,
    events: &mut broadcast::Receiver<SupervisorEvent>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let input = match line.parse::<Input>() {
                    Ok(input) => input,
                    Err(input::InputError::Empty) => continue,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };
                if input == Input::Quit {
                    return Ok(());
                }
                run_input(handle, input).await?;
            }
            event = events.recv() => match event {
                Ok(SupervisorEvent::ManualAnalysis(analysis)) if analysis.complete => {
                    println!("{}", display::manual_lines(&analysis));
                }
                Ok(SupervisorEvent::Error(message)) => println!("! {}", message),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn run_input(handle: &SupervisorHandle, input: Input) -> anyhow::Result<()> {
    let result = match input {
        Input::Next => handle.next_move().await,
        Input::Prev => handle.prev_move().await,
        Input::Start => handle.go_to_start().await,
        Input::End => handle.go_to_end().await,
        Input::Go(ply) => handle.go_to_move(ply).await,
        Input::Explore { start_ply, moves } => handle.explore_line(moves, start_ply).await,
        Input::Back => handle.back_to_original_game().await,
        Input::Move {
            from,
            to,
            promotion,
        } => handle.make_manual_move(from, to, promotion).await,
        Input::Player(player) => handle.set_active_player(player).await,
        Input::Show => handle.get_snapshot().await.map(|snap| {
            print!("{}", display::score_table(&snap));
            snap
        }),
        Input::Help => {
            println!("{}", HELP);
            return Ok(());
        }
        Input::Quit => return Ok(()),
    };

    match result {
        Ok(snap) => {
            println!("{}", display::position_summary(&snap));
            if let Some(ref manual) = snap.manual {
                if manual.complete && Some(&manual.fen) == snap.displayed_fen.as_ref() {
                    println!("{}", display::manual_lines(manual));
                }
            }
        }
        Err(orchestrator::SupervisorError::Internal(e)) => anyhow::bail!("Supervisor failed: {}", e),
        Err(e) => println!("! {}", e),
    }
    Ok(())
}
