//! Daemon lifecycle: ingress, timers, event egress and shutdown.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use vigil_engine::{Clock, LogIngress, Pipeline, ShardedExecutor, SystemClock};
use vigil_types::{AlertEventKind, PipelineEvent, PipelineEventEnvelope};

use crate::config::VigilConfig;
use crate::error::DaemonResult;
use crate::ingress::{load_templates, IngressLine};

/// Counters of one ingress run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngressStats {
    pub lines: u64,
    pub records: u64,
    pub logs_counted: u64,
    pub acks: u64,
    pub malformed: u64,
}

/// Destination of JSON-lines event output.
pub type EventWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Vigil daemon
pub struct Server {
    config: VigilConfig,
    pipeline: Arc<Pipeline>,
    logs: Option<LogIngress>,
    event_output: Option<EventWriter>,
    exit_on_eof: bool,
}

impl Server {
    /// Build the pipeline and, when configured, the log ingress.
    pub async fn new(config: VigilConfig) -> DaemonResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Like [`Server::new`], reading time from `clock`.
    pub async fn with_clock(config: VigilConfig, clock: Arc<dyn Clock>) -> DaemonResult<Self> {
        let pipeline = Arc::new(Pipeline::new(config.engine(), clock));

        let logs = match &config.ingress.templates_file {
            Some(path) => {
                let templates = load_templates(path).await?;
                Some(LogIngress::new(&config.logs, templates)?)
            }
            None => None,
        };

        Ok(Self {
            config,
            pipeline,
            logs,
            event_output: None,
            exit_on_eof: false,
        })
    }

    /// Write every pipeline event to stdout as one JSON line.
    pub fn with_event_output(mut self, enabled: bool) -> Self {
        self.event_output = enabled.then(|| Box::new(tokio::io::stdout()) as EventWriter);
        self
    }

    /// Write every pipeline event to `writer` as one JSON line.
    pub fn with_event_writer<W>(mut self, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.event_output = Some(Box::new(writer));
        self
    }

    /// Stop once the input is exhausted instead of waiting for a signal.
    pub fn with_exit_on_eof(mut self, enabled: bool) -> Self {
        self.exit_on_eof = enabled;
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Run until a shutdown signal, or end of input with `exit_on_eof`.
    pub async fn run(self) -> DaemonResult<()> {
        match self.config.ingress.input.clone() {
            Some(path) if path.as_os_str() != "-" => {
                let file = tokio::fs::File::open(&path).await?;
                info!(input = %path.display(), "Reading NDJSON input");
                self.run_with(BufReader::new(file)).await
            }
            _ => {
                info!("Reading NDJSON input from stdin");
                self.run_with(BufReader::new(tokio::io::stdin())).await
            }
        }
    }

    /// Run against any line source.
    pub async fn run_with<R>(mut self, input: R) -> DaemonResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        let egress = tokio::spawn(log_events(
            self.pipeline.subscribe(),
            self.event_output.take(),
            stop_rx.clone(),
        ));
        let sweeps = self.spawn_sweeps(stop_rx);
        let executor = ShardedExecutor::start(self.pipeline.clone(), &self.config.executor);

        let mut seal_tick = interval(self.config.timers.seal_interval());
        seal_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut retire_tick = interval(self.config.timers.retire_interval());
        retire_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut lines = input.lines();
        let mut reading = true;
        let mut stats = IngressStats::default();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        info!(
            window_secs = self.config.window.duration_secs,
            detector = %self.config.scoring.detector,
            workers = self.config.executor.workers,
            log_templates = self.logs.is_some(),
            "Vigil daemon started"
        );

        loop {
            tokio::select! {
                line = lines.next_line(), if reading => match line {
                    Ok(Some(line)) => self.handle_line(&executor, &line, &mut stats).await?,
                    Ok(None) => {
                        reading = false;
                        info!(
                            lines = stats.lines,
                            records = stats.records,
                            malformed = stats.malformed,
                            "Input exhausted"
                        );
                        if self.exit_on_eof {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Input read failed");
                        reading = false;
                    }
                },
                _ = seal_tick.tick() => {
                    executor.tick().await?;
                }
                _ = retire_tick.tick() => {
                    let retired = self.pipeline.retire_idle().await;
                    if !retired.is_empty() {
                        info!(series = retired.len(), "Retired idle series");
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        info!("Vigil daemon shutting down");
        self.pipeline.scheduler().cancel();
        executor.shutdown().await;
        // Score whatever the drained queues completed
        self.pipeline.seal_due().await;

        // Everything is published by now; egress drains its queue on stop
        let _ = stop_tx.send(true);
        for handle in [sweeps, egress] {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let degraded = self
            .pipeline
            .health()
            .iter()
            .filter(|h| h.degraded)
            .count();
        info!(
            lines = stats.lines,
            records = stats.records,
            logs_counted = stats.logs_counted,
            acks = stats.acks,
            malformed = stats.malformed,
            dropped = self.pipeline.buffer().total_dropped(),
            degraded,
            "Vigil daemon stopped"
        );
        Ok(())
    }

    async fn handle_line(
        &mut self,
        executor: &ShardedExecutor,
        line: &str,
        stats: &mut IngressStats,
    ) -> DaemonResult<()> {
        let Some(parsed) = IngressLine::parse(line) else {
            return Ok(());
        };
        stats.lines += 1;

        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                stats.malformed += 1;
                warn!(error = %e, "Skipping malformed input line");
                return Ok(());
            }
        };

        match parsed {
            IngressLine::Log(log) => {
                let Some(logs) = self.logs.as_mut() else {
                    debug!("Log line ignored, no templates configured");
                    return Ok(());
                };
                if let Some(record) = logs.to_record(&log) {
                    stats.logs_counted += 1;
                    executor.ingest(record).await?;
                }
            }
            IngressLine::Ack { alert_id } => match self.pipeline.acknowledge(alert_id) {
                Ok(_) => stats.acks += 1,
                Err(e) => warn!(alert_id = %alert_id, error = %e, "Acknowledge rejected"),
            },
            metric => {
                if let Some(record) = metric.into_record() {
                    stats.records += 1;
                    executor.ingest(record).await?;
                }
            }
        }
        Ok(())
    }

    fn spawn_sweeps(&self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        let period = self.config.training.retrain_interval();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing to train yet
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = pipeline.run_sweep().await;
                        if !report.degraded.is_empty() {
                            warn!(series = ?report.degraded, "Series degraded");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Sweep loop stopped");
        })
    }
}

/// Structured-log egress of pipeline events.
///
/// On stop, events already queued on the channel are still written.
async fn log_events(
    mut events: broadcast::Receiver<PipelineEventEnvelope>,
    mut output: Option<EventWriter>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(envelope) => egress(&envelope, &mut output).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event egress lagging, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    loop {
                        match events.try_recv() {
                            Ok(envelope) => egress(&envelope, &mut output).await,
                            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                                warn!(missed, "Event egress lagging, events skipped");
                            }
                            Err(_) => break,
                        }
                    }
                    break;
                }
            }
        }
    }

    if let Some(out) = output.as_mut() {
        if let Err(e) = out.flush().await {
            error!(error = %e, "Event output flush failed");
        }
    }
}

async fn egress(envelope: &PipelineEventEnvelope, output: &mut Option<EventWriter>) {
    log_event(&envelope.event);

    let Some(out) = output.as_mut() else {
        return;
    };
    match serde_json::to_string(envelope) {
        Ok(mut json) => {
            json.push('\n');
            if let Err(e) = out.write_all(json.as_bytes()).await {
                error!(error = %e, "Event output failed");
            }
        }
        Err(e) => error!(error = %e, "Event serialization failed"),
    }
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Score(result) if result.decision => info!(
            series = %result.series,
            window = %result.window_id,
            score = result.score,
            threshold = result.threshold,
            baseline = result.used_baseline(),
            "Anomalous window"
        ),
        PipelineEvent::Score(result) => debug!(
            series = %result.series,
            window = %result.window_id,
            score = result.score,
            "Window scored"
        ),
        PipelineEvent::Alert(event) => {
            let alert = &event.alert;
            match event.kind {
                AlertEventKind::Opened | AlertEventKind::Renotified => warn!(
                    alert_id = %alert.id,
                    series = %alert.series,
                    kind = ?event.kind,
                    peak = alert.peak_score,
                    windows = alert.anomalous_windows,
                    "Alert"
                ),
                AlertEventKind::Updated => debug!(
                    alert_id = %alert.id,
                    series = %alert.series,
                    windows = alert.anomalous_windows,
                    "Alert updated"
                ),
                AlertEventKind::Acknowledged | AlertEventKind::Resolved => info!(
                    alert_id = %alert.id,
                    series = %alert.series,
                    state = %alert.state,
                    "Alert"
                ),
            }
        }
        PipelineEvent::Degraded(health) => error!(
            series = %health.series,
            streak = health.failure_streak,
            last_error = health.last_error.as_deref().unwrap_or(""),
            "Series degraded, scoring continues without a fresh model"
        ),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received terminate signal, initiating graceful shutdown"),
    }
}
