use crate::uci::{format_command, parse_uci_message, UciMessage};
use crate::worker::{WorkerError, WorkerOptions};
use crate::{EngineCommand, EngineEvent};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A running Stockfish child process. Commands go through a writer task,
/// output is parsed by a reader task into [`EngineEvent`]s.
pub struct StockfishEngine {
    process: Child,
    command_tx: mpsc::Sender<EngineCommand>,
    event_rx: Option<mpsc::Receiver<EngineEvent>>,
    options: HashSet<String>,
}

/// Where to find the engine and how to label its logs.
#[derive(Debug, Clone, Default)]
pub struct StockfishConfig {
    /// Explicit binary; searched in common locations when unset.
    pub path: Option<PathBuf>,
    pub label: Option<String>,
}

impl StockfishEngine {
    /// Spawn the engine and complete the `uci` handshake.
    #[tracing::instrument(level = "info", skip(config), fields(label = ?config.label))]
    pub async fn spawn_with_config(config: &StockfishConfig) -> Result<Self, WorkerError> {
        let path = find_stockfish_path(config.path.as_deref()).ok_or(WorkerError::NotInstalled)?;
        tracing::info!("Found Stockfish at: {:?}", path);

        let mut process = tokio::process::Command::new(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!("Failed to spawn Stockfish: {}", e);
                WorkerError::Spawn(e.to_string())
            })?;

        let mut stdin = process
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Spawn("no stdin".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Spawn("no stdout".into()))?;

        stdin
            .write_all(b"uci\n")
            .await
            .map_err(|e| WorkerError::Handshake(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| WorkerError::Handshake(e.to_string()))?;

        let (event_tx, mut event_rx) = mpsc::channel::<EngineEvent>(256);
        let (option_tx, mut option_rx) = mpsc::unbounded_channel::<String>();

        // Output reader
        let reader_tx = event_tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        tracing::warn!("Stockfish stdout EOF - engine closed");
                        let _ = reader_tx
                            .send(EngineEvent::Error("engine closed its output".into()))
                            .await;
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        tracing::trace!("UCI << {}", trimmed);

                        let event = match parse_uci_message(trimmed) {
                            Ok(UciMessage::UciOk) | Ok(UciMessage::ReadyOk) => EngineEvent::Ready,
                            Ok(UciMessage::BestMove { mv, .. }) => {
                                tracing::debug!("Received bestmove: {:?}", mv);
                                EngineEvent::BestMove(mv)
                            }
                            Ok(UciMessage::Info(info)) => EngineEvent::Info(info),
                            Ok(UciMessage::Option { name }) => {
                                let _ = option_tx.send(name);
                                continue;
                            }
                            Ok(UciMessage::Id { .. }) => continue,
                            Err(_) => {
                                tracing::trace!("Failed to parse UCI message: {}", trimmed);
                                continue;
                            }
                        };

                        if reader_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error reading from Stockfish stdout: {}", e);
                        let _ = reader_tx.send(EngineEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            tracing::debug!("Output reader task exiting");
        });

        // Wait for uciok
        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            while let Some(event) = event_rx.recv().await {
                match event {
                    EngineEvent::Ready => return Ok(()),
                    EngineEvent::Error(e) => return Err(e),
                    _ => {}
                }
            }
            Err("engine closed before sending uciok".to_string())
        })
        .await;

        match handshake {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Engine initialization failed: {}", e);
                let _ = process.kill().await;
                return Err(WorkerError::Handshake(e));
            }
            Err(_) => {
                tracing::error!("Timeout waiting for uciok");
                let _ = process.kill().await;
                return Err(WorkerError::Handshake("timeout waiting for uciok".into()));
            }
        }

        let mut options = HashSet::new();
        while let Ok(name) = option_rx.try_recv() {
            options.insert(name);
        }
        tracing::debug!(count = options.len(), "Engine advertised options");

        // Command writer
        let (command_tx, mut command_rx) = mpsc::channel::<EngineCommand>(32);
        let writer_tx = event_tx;
        tokio::spawn(async move {
            while let Some(cmd) = command_rx.recv().await {
                let quit = matches!(cmd, EngineCommand::Quit);
                let line = format_command(&cmd);
                tracing::trace!("UCI >> {}", line);

                let written = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                }
                .await;

                if let Err(e) = written {
                    tracing::error!("Failed to write to stdin: {}", e);
                    let _ = writer_tx.send(EngineEvent::Error(e.to_string())).await;
                    break;
                }
                if quit {
                    break;
                }
            }
            tracing::debug!("Command writer task exiting");
        });

        tracing::info!("Stockfish engine spawned and initialized successfully");
        Ok(Self {
            process,
            command_tx,
            event_rx: Some(event_rx),
            options,
        })
    }

    /// Send a command to the engine
    pub async fn send_command(&self, cmd: EngineCommand) -> Result<(), WorkerError> {
        tracing::debug!("Queueing command: {:?}", cmd);
        self.command_tx
            .send(cmd)
            .await
            .map_err(|e| WorkerError::Send(e.to_string()))
    }

    /// Hand the event stream to a consumer. Returns `None` on the second call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<EngineEvent>> {
        self.event_rx.take()
    }

    pub fn supports_option(&self, name: &str) -> bool {
        self.options.contains(name)
    }

    /// Apply threads, hash, MultiPV and evaluation mode. Options the engine
    /// did not advertise are skipped.
    pub async fn apply_options(&self, options: &WorkerOptions) -> Result<(), WorkerError> {
        let settings = [
            ("Threads", options.threads.clamp(1, 512).to_string()),
            ("Hash", options.hash_mb.clamp(1, 33_554_432).to_string()),
            ("MultiPV", options.line_count.clamp(1, 5).to_string()),
            ("Use NNUE", options.use_acceleration.to_string()),
        ];

        for (name, value) in settings {
            if !self.options.is_empty() && !self.supports_option(name) {
                tracing::debug!(option = name, "Engine does not support option, skipping");
                continue;
            }
            self.send_command(EngineCommand::SetOption {
                name: name.to_string(),
                value: Some(value),
            })
            .await?;
        }
        self.send_command(EngineCommand::IsReady).await
    }

    /// Shutdown the engine
    pub async fn shutdown(mut self) {
        let _ = self.send_command(EngineCommand::Quit).await;
        let _ = tokio::time::timeout(Duration::from_secs(1), self.process.wait()).await;
        let _ = self.process.kill().await;
    }
}

/// Find Stockfish executable, preferring an explicit path.
pub fn find_stockfish_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let candidates = [
        "/usr/local/bin/stockfish",
        "/usr/bin/stockfish",
        "/opt/homebrew/bin/stockfish",
        "/usr/games/stockfish",
    ];

    if let Some(found) = candidates.iter().map(Path::new).find(|p| p.exists()) {
        return Some(found.to_path_buf());
    }

    // Fall back to PATH lookup
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join("stockfish"))
            .find(|p| p.exists())
    })
}
