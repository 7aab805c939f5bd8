//! Leading and trailing throttle for a single changing value.
//!
//! The first value after a quiet interval is published at once. Values that
//! arrive while the interval is running replace each other, and the newest is
//! published when the interval ends. Publishes are never closer than
//! `interval`.
//!
//! Cancelling the parent token discards a pending value. Dropping the
//! throttler ends its input; a pending value still waits for its slot.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

pub struct Throttler<T> {
    input: mpsc::UnboundedSender<T>,
    output: watch::Receiver<T>,
}

impl<T> Throttler<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T, interval: Duration, parent: CancellationToken) -> Self {
        let (input, values) = mpsc::unbounded_channel();
        let (publisher, output) = watch::channel(initial);
        tokio::spawn(run(values, publisher, interval, parent.child_token()));

        Self { input, output }
    }

    pub fn set(&self, value: T) {
        if self.input.send(value).is_err() {
            tracing::trace!("throttler stopped, ignoring input");
        }
    }

    pub fn get(&self) -> T {
        self.output.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.output.clone()
    }
}

async fn run<T>(
    mut values: mpsc::UnboundedReceiver<T>,
    publisher: watch::Sender<T>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut last_publish: Option<Instant> = None;
    let mut pending: Option<T> = None;
    let mut open = true;

    while open || pending.is_some() {
        let next_slot = last_publish.map_or_else(Instant::now, |at| at + interval);

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            value = values.recv(), if open => match value {
                Some(value) => {
                    let now = Instant::now();
                    if last_publish.map_or(true, |at| now >= at + interval) {
                        publisher.send_replace(value);
                        last_publish = Some(now);
                        pending = None;
                    } else {
                        pending = Some(value);
                    }
                }
                None => open = false,
            },
            _ = sleep_until(next_slot), if pending.is_some() => {
                if let Some(value) = pending.take() {
                    publisher.send_replace(value);
                    last_publish = Some(Instant::now());
                }
            }
        }
    }
}
