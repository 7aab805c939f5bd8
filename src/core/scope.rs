use crate::core::debounce::Debouncer;
use crate::core::fetch::{FetchOptions, Fetcher};
use crate::core::throttle::Throttler;
use crate::domain::ports::HttpTransport;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lifetime of one mounted component.
///
/// Utilities created from a scope stop when it is unmounted or dropped:
/// in-flight requests resolve as superseded and pending debounced or
/// throttled values are discarded.
#[derive(Debug, Default)]
pub struct Scope {
    token: CancellationToken,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope nested in this one, e.g. for a child component.
    pub fn child(&self) -> Scope {
        Scope {
            token: self.token.child_token(),
        }
    }

    pub fn fetcher<T, Tr>(&self, transport: Tr, options: FetchOptions) -> Fetcher<T, Tr>
    where
        T: DeserializeOwned + Clone + Send + Sync,
        Tr: HttpTransport,
    {
        Fetcher::new(transport, options, self.token.child_token())
    }

    pub fn debounced<T>(&self, initial: T, delay: Duration) -> Debouncer<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Debouncer::new(initial, delay, self.token.clone())
    }

    pub fn throttled<T>(&self, initial: T, interval: Duration) -> Throttler<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Throttler::new(initial, interval, self.token.clone())
    }

    pub fn unmount(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("unmounting scope");
            self.token.cancel();
        }
    }

    pub fn is_mounted(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
