//! Liveness pings that keep a hosted instance awake while a job runs.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pdfaudit_shared::HeartbeatConfig;

/// A running heartbeat task. Without a target it does nothing.
#[derive(Debug)]
pub struct Heartbeat {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<u64>>,
    join_timeout: Duration,
}

impl Heartbeat {
    /// Start pinging `target` every `config.interval`. `None` starts nothing.
    pub fn start(target: Option<String>, config: &HeartbeatConfig) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let handle = match target {
            Some(url) => match build_client(config) {
                Ok(client) => {
                    info!(%url, "heartbeat started");
                    Some(tokio::spawn(ping_loop(client, url, config.interval, stop_rx)))
                }
                Err(e) => {
                    warn!(error = %e, "heartbeat client could not be built");
                    None
                }
            },
            None => None,
        };
        Self {
            stop,
            handle,
            join_timeout: config.join_timeout,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal the task and wait up to the join timeout for it to end.
    /// Returns the number of pings sent.
    pub async fn stop(self) -> u64 {
        let _ = self.stop.send(true);
        let Some(mut handle) = self.handle else {
            return 0;
        };
        match tokio::time::timeout(self.join_timeout, &mut handle).await {
            Ok(Ok(pings)) => {
                debug!(pings, "heartbeat stopped");
                pings
            }
            Ok(Err(e)) => {
                warn!(error = %e, "heartbeat task failed");
                0
            }
            Err(_) => {
                warn!("heartbeat did not stop in time, aborting");
                handle.abort();
                0
            }
        }
    }
}

fn build_client(config: &HeartbeatConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.request_timeout)
        .build()
}

async fn ping_loop(
    client: reqwest::Client,
    url: String,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> u64 {
    let mut pings = 0;
    loop {
        if *stop.borrow() {
            break;
        }
        // Failures are expected while the instance is waking up.
        if let Err(e) = client.get(&url).send().await {
            debug!(%url, error = %e, "heartbeat ping failed");
        }
        pings += 1;

        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    pings
}
