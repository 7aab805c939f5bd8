//! Trailing debounce for a single changing value.
//!
//! A value passed to [`Debouncer::set`] is published only once `delay` has
//! elapsed without another `set`. Bursts collapse to their last value.
//!
//! Cancelling the parent token discards a pending value. Dropping the
//! debouncer ends its input instead, so a pending value is published at once.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

enum Command<T> {
    Set(T),
    Flush,
    Cancel,
}

pub struct Debouncer<T> {
    input: mpsc::UnboundedSender<Command<T>>,
    output: watch::Receiver<T>,
}

impl<T> Debouncer<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawns the timer task on the current tokio runtime.
    pub fn new(initial: T, delay: Duration, parent: CancellationToken) -> Self {
        let (input, commands) = mpsc::unbounded_channel();
        let (publisher, output) = watch::channel(initial);
        tokio::spawn(run(commands, publisher, delay, parent.child_token()));

        Self { input, output }
    }

    pub fn set(&self, value: T) {
        self.send(Command::Set(value));
    }

    /// Publishes the pending value now instead of waiting for the quiet period.
    pub fn flush(&self) {
        self.send(Command::Flush);
    }

    /// Drops the pending value without publishing it.
    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    pub fn get(&self) -> T {
        self.output.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.output.clone()
    }

    fn send(&self, command: Command<T>) {
        if self.input.send(command).is_err() {
            tracing::trace!("debouncer stopped, ignoring input");
        }
    }
}

async fn run<T>(
    mut commands: mpsc::UnboundedReceiver<Command<T>>,
    publisher: watch::Sender<T>,
    delay: Duration,
    token: CancellationToken,
) {
    let mut pending: Option<T> = None;
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            command = commands.recv() => match command {
                Some(Command::Set(value)) => {
                    pending = Some(value);
                    deadline = Instant::now() + delay;
                }
                Some(Command::Flush) => {
                    if let Some(value) = pending.take() {
                        publisher.send_replace(value);
                    }
                }
                Some(Command::Cancel) => pending = None,
                None => {
                    if let Some(value) = pending.take() {
                        publisher.send_replace(value);
                    }
                    break;
                }
            },
            _ = sleep_until(deadline), if pending.is_some() => {
                if let Some(value) = pending.take() {
                    publisher.send_replace(value);
                }
            }
        }
    }

    if pending.is_some() {
        tracing::trace!("debouncer cancelled with a pending value");
    }
}
