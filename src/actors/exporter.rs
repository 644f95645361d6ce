//! ExporterActor - ships status counters to OpenTSDB
//!
//! The exporter subscribes losslessly to the collection root for incremental
//! updates and turns every delivery into data points for the root, each
//! application, service and instance present in it.
//!
//! ## Batching Strategy
//!
//! - **Size trigger**: flush once `batch_size` points are buffered
//! - **Time trigger**: flush every `flush_interval`
//!
//! A rejected batch stays buffered for the next flush. The buffer is bounded;
//! when it overflows the oldest points are dropped.

use std::collections::{BTreeMap, VecDeque};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, instrument, trace, warn};

use super::messages::{ExporterCommand, ExporterStats};
use crate::config::OpenTsdbConfig;
use crate::status::CollectionStatus;
use crate::subscription::{SubscribeOptions, Subscriber, Subscription};

/// Prefix of every exported metric
const METRIC_PREFIX: &str = "uptree";

/// Buffered points kept across failed flushes, in batches
const MAX_BUFFERED_BATCHES: usize = 16;

static INVALID_CHARS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9\-_./]").ok());

/// Replace characters OpenTSDB does not accept in names and tag values.
pub fn sanitize(value: &str) -> String {
    match INVALID_CHARS.as_ref() {
        Some(regex) => regex.replace_all(value, "_").into_owned(),
        None => value.to_string(),
    }
}

/// One OpenTSDB data point, as accepted by `/api/put`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub metric: String,

    /// Milliseconds since the epoch
    pub timestamp: i64,

    pub value: f64,

    pub tags: BTreeMap<String, String>,
}

/// Converts collection deltas into data points
struct PointBuilder<'a> {
    host: &'a str,
    fallback: DateTime<Utc>,
    points: Vec<DataPoint>,
}

impl PointBuilder<'_> {
    fn push(&mut self, metric: &str, value: f64, at: Option<DateTime<Utc>>, tags: &[(&str, &str)]) {
        let mut tag_map = BTreeMap::from([("host".to_string(), sanitize(self.host))]);
        for (key, value) in tags {
            tag_map.insert(key.to_string(), sanitize(value));
        }
        self.points.push(DataPoint {
            metric: sanitize(metric),
            timestamp: at.unwrap_or(self.fallback).timestamp_millis(),
            value,
            tags: tag_map,
        });
    }

    /// One point per numeric or boolean summary field.
    fn summary(
        &mut self,
        prefix: &str,
        summary: &impl Serialize,
        at: Option<DateTime<Utc>>,
        tags: &[(&str, &str)],
    ) {
        let serde_json::Value::Object(fields) = serde_json::to_value(summary).unwrap_or_default() else {
            return;
        };
        for (field, value) in fields {
            let value = match value {
                serde_json::Value::Bool(flag) => f64::from(u8::from(flag)),
                serde_json::Value::Number(number) => match number.as_f64() {
                    Some(number) => number,
                    None => continue,
                },
                _ => continue,
            };
            self.push(&format!("{prefix}.{field}"), value, at, tags);
        }
    }
}

/// Data points for every node present in a collection delta.
pub fn data_points(status: &CollectionStatus, host: &str, now: DateTime<Utc>) -> Vec<DataPoint> {
    let mut builder = PointBuilder {
        host,
        fallback: now,
        points: Vec::new(),
    };

    builder.summary(METRIC_PREFIX, &status.summary, status.timestamp, &[]);

    for (app, application) in &status.children {
        let tags = [("application", app.as_str())];
        builder.summary(
            &format!("{METRIC_PREFIX}.application"),
            &application.summary,
            application.timestamp,
            &tags,
        );

        for (svc, service) in &application.children {
            let tags = [("application", app.as_str()), ("service", svc.as_str())];
            builder.summary(
                &format!("{METRIC_PREFIX}.service"),
                &service.summary,
                service.timestamp,
                &tags,
            );

            for (address, instance) in &service.children {
                let tags = [
                    ("application", app.as_str()),
                    ("service", svc.as_str()),
                    ("instance", address.as_str()),
                ];
                builder.push(
                    &format!("{METRIC_PREFIX}.instance.up"),
                    f64::from(u8::from(instance.up)),
                    instance.timestamp,
                    &tags,
                );
                builder.push(
                    &format!("{METRIC_PREFIX}.instance.response_time"),
                    instance.response_time.as_secs_f64() * 1e3,
                    instance.timestamp,
                    &tags,
                );
            }
        }
    }

    builder.points
}

/// Actor exporting collection updates
pub struct ExporterActor {
    client: reqwest::Client,

    /// `<address>/api/put`
    url: String,

    host: String,

    batch_size: usize,

    flush_interval: Duration,

    buffer: VecDeque<DataPoint>,

    stats: ExporterStats,

    updates: Subscription<CollectionStatus>,

    command_rx: mpsc::Receiver<ExporterCommand>,
}

impl ExporterActor {
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn run(mut self) {
        debug!("starting exporter");

        let mut ticker = time::interval(self.flush_interval);

        loop {
            tokio::select! {
                update = self.updates.next() => match update {
                    Some(status) => {
                        self.record(&status);
                        if self.buffer.len() >= self.batch_size {
                            trace!("size-based flush triggered ({} points)", self.buffer.len());
                            if let Err(e) = self.flush().await {
                                error!("failed to export data points: {:#}", e);
                            }
                        }
                    }
                    None => {
                        warn!("collection subscription ended, shutting down");
                        break;
                    }
                },

                _ = ticker.tick() => {
                    if !self.buffer.is_empty() {
                        trace!("time-based flush triggered ({} points)", self.buffer.len());
                        if let Err(e) = self.flush().await {
                            error!("failed to export data points: {:#}", e);
                        }
                    }
                }

                command = self.command_rx.recv() => match command {
                    Some(ExporterCommand::Flush { respond_to }) => {
                        let _ = respond_to.send(self.flush().await);
                    }

                    Some(ExporterCommand::GetStats { respond_to }) => {
                        let _ = respond_to.send(self.stats());
                    }

                    Some(ExporterCommand::Shutdown) | None => {
                        debug!("shutting down, flushing {} points", self.buffer.len());
                        if let Err(e) = self.flush().await {
                            error!("final flush failed: {:#}", e);
                        }
                        break;
                    }
                },
            }
        }

        debug!("exporter stopped");
    }

    fn record(&mut self, status: &CollectionStatus) {
        self.buffer
            .extend(data_points(status, &self.host, Utc::now()));

        let limit = self.batch_size * MAX_BUFFERED_BATCHES;
        if self.buffer.len() > limit {
            let overflow = self.buffer.len() - limit;
            self.buffer.drain(..overflow);
            self.stats.dropped += overflow as u64;
            warn!("export buffer full, dropped {overflow} oldest points");
        }
    }

    async fn flush(&mut self) -> Result<()> {
        while !self.buffer.is_empty() {
            let count = self.buffer.len().min(self.batch_size);
            let batch: Vec<&DataPoint> = self.buffer.range(..count).collect();

            self.client
                .post(&self.url)
                .json(&batch)
                .send()
                .await
                .context("failed to reach OpenTSDB")?
                .error_for_status()
                .context("OpenTSDB rejected data points")?;

            self.buffer.drain(..count);
            self.stats.sent += count as u64;
            self.stats.flush_count += 1;
            trace!("exported {count} data points");
        }
        Ok(())
    }

    fn stats(&self) -> ExporterStats {
        ExporterStats {
            buffered: self.buffer.len(),
            ..self.stats.clone()
        }
    }
}

/// Handle for controlling the ExporterActor
#[derive(Clone)]
pub struct ExporterHandle {
    sender: mpsc::Sender<ExporterCommand>,
}

impl ExporterHandle {
    /// Subscribe to `collection` and start exporting.
    pub async fn spawn<S>(collection: &S, config: &OpenTsdbConfig) -> Result<Self>
    where
        S: Subscriber<Status = CollectionStatus>,
    {
        // lossless, so a slow database never gets the exporter evicted
        let updates = collection
            .subscribe(SubscribeOptions::lossless())
            .await
            .context("failed to subscribe to the collection")?;

        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = ExporterActor {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .context("failed to build HTTP client")?,
            url: format!("{}/api/put", config.address.trim_end_matches('/')),
            host: config
                .host
                .clone()
                .unwrap_or_else(crate::util::get_source_host),
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_secs(config.flush_interval.max(1)),
            buffer: VecDeque::new(),
            stats: ExporterStats::default(),
            updates,
            command_rx: cmd_rx,
        };

        tokio::spawn(actor.run());

        Ok(Self { sender: cmd_tx })
    }

    /// Send everything buffered right now
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ExporterCommand::Flush { respond_to: tx })
            .await
            .context("failed to send Flush command")?;

        rx.await.context("failed to receive flush result")?
    }

    pub async fn get_stats(&self) -> Result<ExporterStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ExporterCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive stats")
    }

    pub async fn shutdown(self) {
        let _ = self.sender.send(ExporterCommand::Shutdown).await;
    }
}
