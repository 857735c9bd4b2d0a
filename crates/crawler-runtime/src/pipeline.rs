//! The pipeline scheduler.
//!
//! Four tasks joined by three conduits:
//!
//! ```text
//!  source ──frames(1, drop oldest)──► processing ──commands(bounded)──► dispatch
//!     │                                   │                               │
//!     └──────────────── logs (unbounded, best effort) ────────────────────┴──► log sink
//! ```
//!
//! | Conduit | Kind | Full policy |
//! |---|---|---|
//! | frames | `broadcast` of capacity 1 | newest overwrites oldest; the receiver counts what it missed |
//! | commands | `mpsc` of `command_capacity` | processing waits; nothing is dropped |
//! | logs | unbounded `mpsc` | never blocks |
//!
//! Shutdown is a single [`CancellationToken`]. The source and processing
//! tasks watch it at every suspension point; the dispatch and log tasks
//! drain what is already queued and stop when their senders are gone.

use std::sync::Arc;
use std::time::Duration;

use crawler_hal::FrameSource;
use crawler_perception::PerceptionBackend;
use crawler_types::{ColorFrame, Command, CommandMessage, CrawlerError, LogLine};
use governor::{Quota, RateLimiter};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backoff::Backoff;
use crate::broadcast::derive_group;
use crate::config::PipelineConfig;
use crate::processor::Processor;
use crate::sink::{CommandSink, LogSink};

/// Pause before re-reading a source that had nothing new.
const EMPTY_READ_PAUSE: Duration = Duration::from_millis(5);

/// Counters collected from the tasks once they have all stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub frames_acquired: u64,
    pub frames_processed: u64,
    /// Frames overwritten in the frame conduit before processing saw them.
    pub frames_shed: u64,
    pub commands_dispatched: u64,
    pub dispatch_failures: u64,
    pub safe_stops: u64,
    pub reconnects: u64,
}

#[derive(Default)]
struct SourceStats {
    acquired: u64,
    reconnects: u64,
}

#[derive(Default)]
struct ProcessingStats {
    processed: u64,
    shed: u64,
    safe_stops: u64,
}

#[derive(Default)]
struct DispatchStats {
    dispatched: u64,
    failures: u64,
}

/// Owns a validated configuration and runs it.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// # Errors
    ///
    /// Whatever [`PipelineConfig::validate`] rejects. Geometry problems
    /// surface here, never mid-run.
    pub fn new(config: PipelineConfig) -> Result<Self, CrawlerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run until `cancel` fires, then wait for every task to wind down.
    ///
    /// The source is closed before this returns.
    #[instrument(skip_all, fields(robot = %self.config.robot_id))]
    pub async fn run<S>(
        &self,
        source: S,
        backend: Arc<dyn PerceptionBackend>,
        sink: Arc<dyn CommandSink>,
        log_sink: Box<dyn LogSink>,
        cancel: CancellationToken,
    ) -> Result<PipelineReport, CrawlerError>
    where
        S: FrameSource + 'static,
    {
        let processor = Processor::new(&self.config, backend)?;

        let (frame_tx, frame_rx) = broadcast::channel::<Arc<ColorFrame>>(1);
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(self.config.pipeline.command_capacity);
        let (log_tx, log_rx) = mpsc::unbounded_channel::<LogLine>();

        info!(
            builder = ?self.config.builder,
            strategy = ?self.config.strategy,
            fps = self.config.fps,
            "pipeline starting"
        );

        let source_task = tokio::spawn(source_loop(
            source,
            self.config.clone(),
            frame_tx,
            log_tx.clone(),
            cancel.clone(),
        ));
        let processing_task = tokio::spawn(processing_loop(
            processor,
            self.config.pipeline.stale_after(),
            frame_rx,
            cmd_tx,
            log_tx.clone(),
            cancel.clone(),
        ));
        let dispatch_task = tokio::spawn(dispatch_loop(
            cmd_rx,
            sink,
            self.config.followers.clone(),
            log_tx,
        ));
        let log_task = tokio::spawn(log_loop(log_rx, log_sink));

        let source = join("source", source_task).await?;
        let processing = join("processing", processing_task).await?;
        let dispatch = join("dispatch", dispatch_task).await?;
        join("log", log_task).await?;

        let report = PipelineReport {
            frames_acquired: source.acquired,
            frames_processed: processing.processed,
            frames_shed: processing.shed,
            commands_dispatched: dispatch.dispatched,
            dispatch_failures: dispatch.failures,
            safe_stops: processing.safe_stops,
            reconnects: source.reconnects,
        };
        info!(?report, "pipeline stopped");
        Ok(report)
    }
}

async fn join<T>(name: &str, handle: JoinHandle<T>) -> Result<T, CrawlerError> {
    handle
        .await
        .map_err(|e| CrawlerError::Channel(format!("{name} task failed: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Source → frames
// ─────────────────────────────────────────────────────────────────────────────

async fn source_loop<S: FrameSource>(
    mut source: S,
    config: PipelineConfig,
    frames: broadcast::Sender<Arc<ColorFrame>>,
    logs: mpsc::UnboundedSender<LogLine>,
    cancel: CancellationToken,
) -> SourceStats {
    let mut stats = SourceStats::default();
    let limiter = Quota::with_period(config.frame_period()).map(RateLimiter::direct);
    let read_timeout = config.pipeline.read_timeout();
    let mut backoff = Backoff::new();
    let mut opened = false;
    let mut opens = 0u64;

    while !cancel.is_cancelled() {
        if !opened {
            match source.open().await {
                Ok(()) => {
                    if opens > 0 {
                        stats.reconnects += 1;
                    }
                    opens += 1;
                    info!(source = source.id(), opens, "frame source opened");
                    backoff.reset();
                    opened = true;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(source = source.id(), error = %e, ?delay, attempt = backoff.failures(), "open failed, backing off");
                    let _ = logs.send(LogLine::now(format!("SOURCE: {e}, retrying in {delay:?}")));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(delay) => continue,
                    }
                }
            }
        }

        if let Some(limiter) = &limiter {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = limiter.until_ready() => {}
            }
        }

        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            r = timeout(read_timeout, source.next_frame()) => r,
        };
        match read {
            Ok(Ok(Some(frame))) => {
                stats.acquired += 1;
                if frames.send(Arc::new(frame)).is_err() {
                    debug!("processing gone, source stopping");
                    break;
                }
            }
            Ok(Ok(None)) => sleep(EMPTY_READ_PAUSE).await,
            Ok(Err(e)) => {
                warn!(source = source.id(), error = %e, "frame read failed, reopening");
                let _ = logs.send(LogLine::now(format!("SOURCE: {e}")));
                source.close().await;
                opened = false;
            }
            Err(_) => {
                warn!(source = source.id(), ?read_timeout, "frame read timed out, reopening");
                source.close().await;
                opened = false;
            }
        }
    }

    source.close().await;
    debug!(acquired = stats.acquired, "source task done");
    stats
}

// ─────────────────────────────────────────────────────────────────────────────
// Frames → commands
// ─────────────────────────────────────────────────────────────────────────────

async fn processing_loop(
    mut processor: Processor,
    stale_after: Duration,
    mut frames: broadcast::Receiver<Arc<ColorFrame>>,
    commands: mpsc::Sender<Command>,
    logs: mpsc::UnboundedSender<LogLine>,
    cancel: CancellationToken,
) -> ProcessingStats {
    let mut stats = ProcessingStats::default();

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = timeout(stale_after, frames.recv()) => r,
        };
        let outcome = match received {
            Ok(Ok(frame)) => {
                stats.processed += 1;
                // Tokio's clock so paused-time tests see the same instants.
                processor.tick(&frame, Instant::now().into_std()).await
            }
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                debug!(shed = n, "frames shed");
                stats.shed += n;
                continue;
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
            Err(_) => {
                let outcome = processor.on_stale();
                if outcome.command.is_some() {
                    stats.safe_stops += 1;
                }
                outcome
            }
        };

        for line in outcome.logs {
            let _ = logs.send(line);
        }
        // Not raced against cancellation: a decided command is always handed
        // over, and dispatch drains the conduit.
        if let Some(command) = outcome.command {
            if commands.send(command).await.is_err() {
                warn!("dispatch gone, processing stopping");
                break;
            }
        }
    }

    debug!(processed = stats.processed, shed = stats.shed, "processing task done");
    stats
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands → sink
// ─────────────────────────────────────────────────────────────────────────────

async fn dispatch_loop(
    mut commands: mpsc::Receiver<Command>,
    sink: Arc<dyn CommandSink>,
    followers: Vec<String>,
    logs: mpsc::UnboundedSender<LogLine>,
) -> DispatchStats {
    let mut stats = DispatchStats::default();

    while let Some(command) = commands.recv().await {
        let msg = CommandMessage::from(&command);
        match sink.publish_command(&msg).await {
            Ok(()) => stats.dispatched += 1,
            Err(e) => {
                // Dropped for this tick; the next one supersedes it.
                stats.failures += 1;
                warn!(cmd = %command.verb, error = %e, "dispatch failed");
                let _ = logs.send(LogLine::now(format!("DISPATCH FAILED: {e}")));
            }
        }
        if let Some(group) = derive_group(&command, &followers) {
            if let Err(e) = sink.publish_group(&group).await {
                warn!(followers = followers.len(), error = %e, "group dispatch failed");
            }
        }
    }

    stats
}

// ─────────────────────────────────────────────────────────────────────────────
// Logs → sink
// ─────────────────────────────────────────────────────────────────────────────

async fn log_loop(mut lines: mpsc::UnboundedReceiver<LogLine>, mut sink: Box<dyn LogSink>) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = sink.write_line(&line).await {
            warn!(error = %e, "log sink write failed");
        }
    }
    if let Err(e) = sink.flush().await {
        warn!(error = %e, "log sink flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_geometry_is_fatal_at_construction() {
        let mut config = PipelineConfig::default();
        config.perception.corridor_width = Some(0);
        assert!(matches!(Pipeline::new(config), Err(CrawlerError::InvalidGeometry(_))));
    }

    #[test]
    fn default_config_builds() -> Result<(), CrawlerError> {
        let pipeline = Pipeline::new(PipelineConfig::default())?;
        assert_eq!(pipeline.config().robot_id, "LEADER-01");
        Ok(())
    }

    #[tokio::test]
    async fn frame_conduit_keeps_only_the_newest() -> Result<(), Box<dyn std::error::Error>> {
        let (tx, mut rx) = broadcast::channel::<Arc<ColorFrame>>(1);
        for v in [10u8, 20, 30] {
            tx.send(Arc::new(ColorFrame::solid(2, 2, [v, v, v])))?;
        }
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(2))));
        let newest = rx.recv().await?;
        assert_eq!(newest.pixel(0, 0), [30, 30, 30]);
        Ok(())
    }
}
