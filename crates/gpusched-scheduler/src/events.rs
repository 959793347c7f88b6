//! Admission event pump with reconnect

use futures::StreamExt;
use gpusched_cluster::WorkloadEventSource;
use gpusched_core::WorkloadEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Forwards workload events from a source into a bounded channel
///
/// The pump resubscribes after the stream ends or a subscribe call fails,
/// and stops once the receiving side is dropped.
pub struct EventPump {
    source: Arc<dyn WorkloadEventSource>,
    capacity: usize,
    backoff: Duration,
}

impl EventPump {
    pub fn new(source: Arc<dyn WorkloadEventSource>, capacity: usize, backoff: Duration) -> Self {
        Self {
            source,
            capacity: capacity.max(1),
            backoff,
        }
    }

    /// Start the pump task and return the consuming end of its queue
    pub fn spawn(self) -> mpsc::Receiver<WorkloadEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        tokio::spawn(self.pump(tx));
        rx
    }

    async fn pump(self, tx: mpsc::Sender<WorkloadEvent>) {
        let mut subscription: u64 = 0;

        loop {
            match self.source.subscribe().await {
                Ok(mut stream) => {
                    subscription += 1;
                    info!(subscription = subscription, "Subscribed to workload events");

                    loop {
                        let item = tokio::select! {
                            item = stream.next() => item,
                            _ = tx.closed() => {
                                debug!("Event consumer gone, stopping pump");
                                return;
                            }
                        };
                        match item {
                            Some(Ok(event)) => {
                                if tx.send(event).await.is_err() {
                                    debug!("Event consumer gone, stopping pump");
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "Workload event stream error");
                            }
                            None => break,
                        }
                    }

                    warn!(
                        subscription = subscription,
                        backoff_secs = self.backoff.as_secs(),
                        "Workload event stream ended, resubscribing"
                    );
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs = self.backoff.as_secs(),
                        "Failed to subscribe to workload events"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.backoff) => {}
                _ = tx.closed() => {
                    debug!("Event consumer gone, stopping pump");
                    return;
                }
            }
        }
    }
}
