//! Dispatch and telemetry sinks.
//!
//! The pipeline hands every command to a [`CommandSink`] and every free-text
//! log line to a [`LogSink`]. The bus-backed [`BusSink`] is the production
//! boundary toward whatever transport client subscribes to the topics.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use crawler_middleware::{EventBus, Topic};
use crawler_types::{CommandMessage, CrawlerError, Event, EventPayload, GroupMessage, LogLine};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Receives outbound command traffic. Failures are reported, never retried.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn publish_command(&self, msg: &CommandMessage) -> Result<(), CrawlerError>;

    async fn publish_group(&self, msg: &GroupMessage) -> Result<(), CrawlerError>;
}

/// Publishes onto the in-process [`EventBus`].
#[derive(Clone)]
pub struct BusSink {
    bus: EventBus,
    source: String,
}

impl BusSink {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            source: "crawler-runtime::dispatch".to_string(),
        }
    }

    fn publish(&self, topic: Topic, payload: EventPayload) -> Result<(), CrawlerError> {
        self.bus
            .publish_to(topic, Event::new(self.source.clone(), payload))
            .map(|n| debug!(?topic, receivers = n, "published"))
            .map_err(|e| CrawlerError::Dispatch(e.to_string()))
    }
}

#[async_trait]
impl CommandSink for BusSink {
    async fn publish_command(&self, msg: &CommandMessage) -> Result<(), CrawlerError> {
        self.publish(Topic::Commands, EventPayload::Command(msg.clone()))
    }

    async fn publish_group(&self, msg: &GroupMessage) -> Result<(), CrawlerError> {
        self.publish(Topic::GroupCommands, EventPayload::Group(msg.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Log lines
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only consumer of telemetry lines.
#[async_trait]
pub trait LogSink: Send {
    async fn write_line(&mut self, line: &LogLine) -> Result<(), CrawlerError>;

    async fn flush(&mut self) -> Result<(), CrawlerError> {
        Ok(())
    }
}

/// Formats a line the way the log file stores it.
pub fn format_line(line: &LogLine) -> String {
    format!(
        "[{}] {}\n",
        line.timestamp.with_timezone(&Local).format("%H:%M:%S"),
        line.message
    )
}

/// Appends `[HH:MM:SS] message` lines to a file. Rotation is left to the
/// environment.
pub struct FileLogSink {
    path: PathBuf,
    file: File,
}

impl FileLogSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CrawlerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CrawlerError::InvalidConfig(format!("cannot open log file {}: {e}", path.display())))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn write_line(&mut self, line: &LogLine) -> Result<(), CrawlerError> {
        self.file
            .write_all(format_line(line).as_bytes())
            .await
            .map_err(|e| CrawlerError::Dispatch(format!("log write to {}: {e}", self.path.display())))
    }

    async fn flush(&mut self) -> Result<(), CrawlerError> {
        self.file
            .flush()
            .await
            .map_err(|e| CrawlerError::Dispatch(format!("log flush: {e}")))
    }
}

/// Re-emits lines as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn write_line(&mut self, line: &LogLine) -> Result<(), CrawlerError> {
        info!(target: "crawler::telemetry", "{}", line.message);
        Ok(())
    }
}

/// Mirrors lines onto [`Topic::Telemetry`]. Having no subscriber is fine.
#[async_trait]
impl LogSink for BusSink {
    async fn write_line(&mut self, line: &LogLine) -> Result<(), CrawlerError> {
        if self.bus.subscriber_count(Topic::Telemetry) > 0 {
            self.publish(Topic::Telemetry, EventPayload::Log(line.clone()))?;
        }
        Ok(())
    }
}

/// Fans every line out to several sinks; one failing sink does not starve
/// the others.
#[derive(Default)]
pub struct TeeLogSink {
    sinks: Vec<Box<dyn LogSink>>,
}

impl TeeLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl LogSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

#[async_trait]
impl LogSink for TeeLogSink {
    async fn write_line(&mut self, line: &LogLine) -> Result<(), CrawlerError> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.write_line(line).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn flush(&mut self) -> Result<(), CrawlerError> {
        for sink in &mut self.sinks {
            sink.flush().await?;
        }
        Ok(())
    }
}
