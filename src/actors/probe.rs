//! ProbeActor - checks one instance address on a timer
//!
//! Each configured instance gets its own probe. The probe owns its HTTP client
//! (or just the address for TCP checks) and pushes every result into the
//! instance's [`InstanceFeed`].
//!
//! ## Message Flow
//!
//! ```text
//! jittered first tick, then every interval → check → Sample → InstanceFeed → instance broker
//!     ↑
//!     └─── Commands (CheckNow, Shutdown)
//! ```
//!
//! A failed check is not an error: it produces a sample with `up = false`.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use reqwest::redirect::Policy;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, error, instrument, trace};

use super::messages::ProbeCommand;
use crate::config::{CheckOptions, CheckType, HttpCheckConfig, HttpMethod};
use crate::status::Sample;
use crate::tree::InstanceFeed;

enum Check {
    TcpConnect,
    HttpStatus {
        client: reqwest::Client,
        method: reqwest::Method,
    },
}

impl Check {
    fn build(options: &CheckOptions) -> Result<Self> {
        Ok(match options.kind {
            CheckType::TcpConnect => Check::TcpConnect,
            CheckType::HttpStatus => Check::HttpStatus {
                client: http_client(&options.http, options.interval)?,
                method: match options.http.method {
                    HttpMethod::Get => reqwest::Method::GET,
                    HttpMethod::Head => reqwest::Method::HEAD,
                    HttpMethod::Post => reqwest::Method::POST,
                },
            },
        })
    }
}

fn http_client(http: &HttpCheckConfig, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .redirect(Policy::none())
        .timeout(timeout)
        .danger_accept_invalid_certs(http.skip_tls_verify);

    if let Some(ca) = &http.ca {
        let pem = std::fs::read(ca).with_context(|| format!("failed to read CA file {}", ca.display()))?;
        for certificate in reqwest::Certificate::from_pem_bundle(&pem).context("invalid CA certificate")? {
            builder = builder.add_root_certificate(certificate);
        }
    }

    if let (Some(cert), Some(key)) = (&http.client_cert, &http.client_key) {
        let mut pem = std::fs::read(cert)
            .with_context(|| format!("failed to read client certificate {}", cert.display()))?;
        pem.extend(
            std::fs::read(key).with_context(|| format!("failed to read client key {}", key.display()))?,
        );
        builder = builder.identity(reqwest::Identity::from_pem(&pem).context("invalid client identity")?);
    }

    builder.build().context("failed to build HTTP client")
}

/// Actor that probes a single instance
pub struct ProbeActor {
    address: String,

    check: Check,

    interval: Duration,

    /// Delay before the first check
    jitter: Duration,

    feed: InstanceFeed,

    command_rx: mpsc::Receiver<ProbeCommand>,
}

impl ProbeActor {
    #[instrument(skip(self), fields(instance = %self.address))]
    pub async fn run(mut self) {
        debug!(jitter = ?self.jitter, "starting probe");

        let mut ticker = interval_at(Instant::now() + self.jitter, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sample = self.probe().await;
                    if let Err(e) = self.feed.push(sample).await {
                        error!("failed to publish sample: {:#}", e);
                        break;
                    }
                }

                command = self.command_rx.recv() => match command {
                    Some(ProbeCommand::CheckNow { respond_to }) => {
                        debug!("received CheckNow command");
                        let sample = self.probe().await;
                        let result = self.feed.push(sample).await.map(|_| sample);
                        let _ = respond_to.send(result);
                    }

                    Some(ProbeCommand::Shutdown) => {
                        debug!("received shutdown command");
                        break;
                    }

                    None => {
                        debug!("command channel closed, shutting down");
                        break;
                    }
                },
            }
        }

        debug!("probe stopped");
    }

    async fn probe(&self) -> Sample {
        let start = std::time::Instant::now();
        let up = match &self.check {
            Check::TcpConnect => self.tcp_connect().await,
            Check::HttpStatus { client, method } => self.http_status(client, method).await,
        };

        let sample = Sample {
            up,
            response_time: start.elapsed(),
            observed_at: Utc::now(),
        };
        trace!(up, response_time = ?sample.response_time, "check finished");
        sample
    }

    async fn tcp_connect(&self) -> bool {
        match timeout(self.interval, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("connect failed: {e}");
                false
            }
            Err(_) => {
                debug!("connect timed out");
                false
            }
        }
    }

    async fn http_status(&self, client: &reqwest::Client, method: &reqwest::Method) -> bool {
        match client.request(method.clone(), &self.address).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                trace!(status, "received response");
                (200..=399).contains(&status)
            }
            Err(e) => {
                debug!("request failed: {e}");
                false
            }
        }
    }
}

/// Handle for controlling a ProbeActor
#[derive(Clone)]
pub struct ProbeHandle {
    sender: mpsc::Sender<ProbeCommand>,
    address: String,
}

impl ProbeHandle {
    /// Spawn a probe for `address`. The first check is delayed by a random
    /// fraction of the interval drawn from `rng`.
    pub fn spawn(
        address: impl Into<String>,
        options: &CheckOptions,
        feed: InstanceFeed,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let address = address.into();
        let check = Check::build(options).with_context(|| format!("invalid check for {address}"))?;
        let jitter = options.interval.mul_f64(rng.gen_range(0.0..1.0));

        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = ProbeActor {
            address: address.clone(),
            check,
            interval: options.interval,
            jitter,
            feed,
            command_rx: cmd_rx,
        };

        tokio::spawn(actor.run());

        Ok(Self {
            sender: cmd_tx,
            address,
        })
    }

    /// Run a check immediately and return its sample
    pub async fn check_now(&self) -> Result<Sample> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ProbeCommand::CheckNow { respond_to: tx })
            .await
            .context("failed to send CheckNow command")?;

        rx.await.context("failed to receive sample")?
    }

    pub async fn shutdown(self) {
        let _ = self.sender.send(ProbeCommand::Shutdown).await;
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}
