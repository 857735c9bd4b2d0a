//! End-to-end runs of the scheduler with in-memory sources and sinks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use crawler_hal::{FrameSource, ScriptedSource, SimCamera};
use crawler_middleware::{EventBus, Topic};
use crawler_perception::{DepthMap, Detection, PerceptionBackend, UnavailableBackend};
use crawler_runtime::{
    BuilderKind, BusSink, CommandSink, LogSink, Pipeline, PipelineConfig, PipelineReport, SchedulerConfig,
};
use crawler_types::{ColorFrame, CommandMessage, CommandVerb, CrawlerError, EventPayload, GroupMessage, LogLine};
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn std::error::Error>>;

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingSink {
    commands: Mutex<Vec<CommandMessage>>,
}

impl RecordingSink {
    fn commands(&self) -> Vec<CommandMessage> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn publish_command(&self, msg: &CommandMessage) -> Result<(), CrawlerError> {
        self.commands
            .lock()
            .map_err(|e| CrawlerError::Dispatch(e.to_string()))?
            .push(msg.clone());
        Ok(())
    }

    async fn publish_group(&self, _msg: &GroupMessage) -> Result<(), CrawlerError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct MemoryLog(Arc<Mutex<Vec<String>>>);

impl MemoryLog {
    fn lines(&self) -> Vec<String> {
        self.0.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

#[async_trait]
impl LogSink for MemoryLog {
    async fn write_line(&mut self, line: &LogLine) -> Result<(), CrawlerError> {
        self.0
            .lock()
            .map_err(|e| CrawlerError::Dispatch(e.to_string()))?
            .push(line.message.clone());
        Ok(())
    }
}

/// Endless open-floor frames; records whether it was closed.
struct WatchedSource {
    inner: SimCamera,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSource for WatchedSource {
    fn id(&self) -> &str {
        "watched"
    }

    async fn open(&mut self) -> Result<(), CrawlerError> {
        self.inner.open().await
    }

    async fn next_frame(&mut self) -> Result<Option<ColorFrame>, CrawlerError> {
        self.inner.next_frame().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close().await;
    }
}

/// Flat depth, but every estimate takes a while.
struct SlowBackend {
    delay: Duration,
}

#[async_trait]
impl PerceptionBackend for SlowBackend {
    fn name(&self) -> &str {
        "slow"
    }

    async fn detect(&self, _frame: &ColorFrame) -> Result<Vec<Detection>, CrawlerError> {
        Ok(Vec::new())
    }

    async fn estimate_depth(&self, _frame: &ColorFrame) -> Result<DepthMap, CrawlerError> {
        tokio::time::sleep(self.delay).await;
        DepthMap::new(8, 6, vec![0.2; 48])
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        fps: 200.0,
        ..Default::default()
    }
}

fn dark_frame() -> ColorFrame {
    ColorFrame::solid(320, 240, [2, 2, 2])
}

/// Run a pipeline for `duration`, then cancel and collect the report.
async fn run_for<S: FrameSource + 'static>(
    config: PipelineConfig,
    source: S,
    backend: Arc<dyn PerceptionBackend>,
    sink: Arc<dyn CommandSink>,
    log: MemoryLog,
    duration: Duration,
) -> Result<PipelineReport, Box<dyn std::error::Error>> {
    let pipeline = Pipeline::new(config)?;
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        stopper.cancel();
    });
    let report = tokio::time::timeout(
        duration + Duration::from_secs(5),
        pipeline.run(source, backend, sink, Box::new(log), cancel),
    )
    .await??;
    Ok(report)
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn darkness_always_stops_at_full_magnitude() -> TestResult {
    let sink = Arc::new(RecordingSink::default());
    let log = MemoryLog::default();
    let source = ScriptedSource::new("dark").push_frames(dark_frame(), 4);

    let report = run_for(
        fast_config(),
        source,
        Arc::new(UnavailableBackend),
        sink.clone(),
        log.clone(),
        Duration::from_millis(300),
    )
    .await?;

    let commands = sink.commands();
    assert!(!commands.is_empty());
    assert_eq!(commands.len() as u64, report.commands_dispatched);
    assert!(commands.iter().all(|c| c.cmd == CommandVerb::Stop && c.value == vec![1.0]));
    assert!(log.contains("CRITICAL: NO LIGHT"));
    assert!(log.contains("CMD: stop | VAL: 1"));
    Ok(())
}

#[tokio::test]
async fn commands_leave_in_production_order() -> TestResult {
    let sink = Arc::new(RecordingSink::default());
    let source = SimCamera::new("sim", 320, 240);

    let report = run_for(
        fast_config(),
        source,
        Arc::new(UnavailableBackend),
        sink.clone(),
        MemoryLog::default(),
        Duration::from_millis(600),
    )
    .await?;

    let commands = sink.commands();
    assert!(commands.len() >= 2, "{report:?}");
    assert!(commands.windows(2).all(|w| w[0].time_stamp <= w[1].time_stamp));
    assert!(commands.iter().all(|c| c.robot_id == "LEADER-01" && c.validate().is_ok()));
    // The first frame only primes the drift reference.
    assert_eq!(report.commands_dispatched, report.frames_processed - 1);
    Ok(())
}

#[tokio::test]
async fn cancellation_closes_the_source() -> TestResult {
    let closed = Arc::new(AtomicBool::new(false));
    let source = WatchedSource {
        inner: SimCamera::new("watched", 320, 240),
        closed: closed.clone(),
    };
    run_for(
        fast_config(),
        source,
        Arc::new(UnavailableBackend),
        Arc::new(RecordingSink::default()),
        MemoryLog::default(),
        Duration::from_millis(100),
    )
    .await?;
    assert!(closed.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn missing_perception_degrades_to_unknown_field() -> TestResult {
    let config = PipelineConfig {
        builder: BuilderKind::DepthFusion,
        ..fast_config()
    };
    let sink = Arc::new(RecordingSink::default());
    let log = MemoryLog::default();
    let source = ScriptedSource::new("gray").push_frames(ColorFrame::solid(640, 480, [120, 120, 120]), 3);

    run_for(
        config,
        source,
        Arc::new(UnavailableBackend),
        sink.clone(),
        log.clone(),
        Duration::from_millis(300),
    )
    .await?;

    let commands = sink.commands();
    assert!(!commands.is_empty());
    for c in &commands {
        assert_eq!(c.cmd, CommandVerb::Forward);
        assert_eq!(c.value, vec![0.5]);
    }
    assert!(log.contains("PERCEPTION UNAVAILABLE"));
    Ok(())
}

#[tokio::test]
async fn stale_frames_end_in_a_single_safe_stop() -> TestResult {
    let config = PipelineConfig {
        pipeline: SchedulerConfig {
            stale_after_ms: 20,
            stale_ticks_before_stop: 3,
            ..Default::default()
        },
        ..fast_config()
    };
    let sink = Arc::new(RecordingSink::default());
    let log = MemoryLog::default();

    let report = run_for(
        config,
        ScriptedSource::new("silent"),
        Arc::new(UnavailableBackend),
        sink.clone(),
        log.clone(),
        Duration::from_millis(400),
    )
    .await?;

    assert_eq!(report.frames_processed, 0);
    assert_eq!(report.safe_stops, 1);
    let commands = sink.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].cmd, CommandVerb::Stop);
    assert!(log.contains("STALE"));
    Ok(())
}

#[tokio::test]
async fn refused_transport_is_retried_with_backoff() -> TestResult {
    let log = MemoryLog::default();
    let source = SimCamera::new("flaky", 320, 240).with_failing_opens(2);

    let report = run_for(
        fast_config(),
        source,
        Arc::new(UnavailableBackend),
        Arc::new(RecordingSink::default()),
        log.clone(),
        Duration::from_millis(900),
    )
    .await?;

    // 100 ms + 200 ms of backoff, then frames flow.
    assert!(report.frames_acquired > 0, "{report:?}");
    let refusals = log.lines().iter().filter(|l| l.starts_with("SOURCE:")).count();
    assert_eq!(refusals, 2);
    Ok(())
}

#[tokio::test]
async fn slow_inference_sheds_stale_frames() -> TestResult {
    let config = PipelineConfig {
        builder: BuilderKind::DepthFusion,
        ..fast_config()
    };
    let backend = SlowBackend {
        delay: Duration::from_millis(60),
    };

    let report = run_for(
        config,
        SimCamera::new("sim", 640, 480),
        Arc::new(backend),
        Arc::new(RecordingSink::default()),
        MemoryLog::default(),
        Duration::from_millis(700),
    )
    .await?;

    assert!(report.frames_shed > 0, "{report:?}");
    assert!(report.frames_processed < report.frames_acquired);
    assert!(report.frames_processed + report.frames_shed <= report.frames_acquired);
    Ok(())
}

#[tokio::test]
async fn unreachable_sink_drops_commands_and_keeps_running() -> TestResult {
    let log = MemoryLog::default();
    let sink = BusSink::new(EventBus::new(8));
    let source = ScriptedSource::new("dark").push_frames(dark_frame(), 3);

    let report = run_for(
        fast_config(),
        source,
        Arc::new(UnavailableBackend),
        Arc::new(sink),
        log.clone(),
        Duration::from_millis(300),
    )
    .await?;

    assert_eq!(report.commands_dispatched, 0);
    assert!(report.dispatch_failures >= 1);
    assert_eq!(report.dispatch_failures, report.frames_processed);
    assert!(log.contains("DISPATCH FAILED"));
    Ok(())
}

#[tokio::test]
async fn followers_receive_the_group_message() -> TestResult {
    let bus = EventBus::new(64);
    let mut commands = bus.subscribe_to(Topic::Commands);
    let mut groups = bus.subscribe_to(Topic::GroupCommands);
    let config = PipelineConfig {
        followers: vec!["F-01".to_string(), "F-02".to_string()],
        ..fast_config()
    };
    let source = ScriptedSource::new("dark").push_frame(dark_frame());

    run_for(
        config,
        source,
        Arc::new(UnavailableBackend),
        Arc::new(BusSink::new(bus.clone())),
        MemoryLog::default(),
        Duration::from_millis(200),
    )
    .await?;

    let leader = tokio::time::timeout(Duration::from_secs(1), commands.recv())
        .await?
        .ok_or("command topic closed")?;
    assert!(matches!(leader.payload, EventPayload::Command(ref c) if c.cmd == CommandVerb::Stop));

    let event = tokio::time::timeout(Duration::from_secs(1), groups.recv())
        .await?
        .ok_or("group topic closed")?;
    let EventPayload::Group(group) = event.payload else {
        return Err("expected a group payload".into());
    };
    assert_eq!(group.robot_leader_id, "LEADER-01");
    let ids: Vec<&str> = group.cmds.iter().map(|c| c.robot_id.as_str()).collect();
    assert_eq!(ids, ["F-01", "F-02"]);
    assert!(group.cmds.iter().all(|c| c.cmd == CommandVerb::Stop));
    Ok(())
}
