use crate::config::toml_config::FetchKitConfig;
use crate::domain::model::{FetchOutcome, FetchRequest, FetchState, HttpResponse};
use crate::domain::ports::HttpTransport;
use crate::utils::error::{FetchError, Result};
use serde::de::DeserializeOwned;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Extra attempts after the first one for transient failures.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retry_attempts: 0,
            retry_delay: Duration::from_millis(250),
        }
    }
}

impl FetchOptions {
    pub fn from_config(config: &FetchKitConfig) -> Self {
        Self {
            retry_attempts: config.retry.attempts,
            retry_delay: config.retry_delay(),
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    generation: u64,
    token: Option<CancellationToken>,
}

/// Runs requests for one component, keeping only the newest one alive.
///
/// Every call to [`Fetcher::execute`] cancels the request started before it.
/// A cancelled request resolves to [`FetchOutcome::Superseded`] and never
/// writes to the published [`FetchState`].
pub struct Fetcher<T, Tr> {
    transport: Tr,
    options: FetchOptions,
    parent: CancellationToken,
    in_flight: Mutex<InFlight>,
    state: watch::Sender<FetchState<T>>,
}

impl<T, Tr> Fetcher<T, Tr>
where
    T: DeserializeOwned + Clone + Send + Sync,
    Tr: HttpTransport,
{
    pub fn new(transport: Tr, options: FetchOptions, parent: CancellationToken) -> Self {
        let (state, _) = watch::channel(FetchState::Idle);
        Self {
            transport,
            options,
            parent,
            in_flight: Mutex::new(InFlight::default()),
            state,
        }
    }

    pub fn state(&self) -> FetchState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.state.subscribe()
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock_in_flight().token.is_some()
    }

    pub fn transport(&self) -> &Tr {
        &self.transport
    }

    pub async fn execute(&self, mut request: FetchRequest) -> Result<FetchOutcome<T>> {
        let Some((generation, token)) = self.begin() else {
            tracing::debug!("scope closed, not starting {} {}", request.method, request.url);
            return Ok(FetchOutcome::Superseded);
        };

        if request.method.is_mutating() && request.idempotency_key.is_none() {
            request.idempotency_key = Some(Uuid::new_v4().to_string());
        }

        tracing::debug!(
            generation,
            idempotency_key = request.idempotency_key.as_deref(),
            "starting {} {}",
            request.method,
            request.url
        );

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(generation, "request cancelled: {}", request.url);
                self.release(generation);
                return Ok(FetchOutcome::Superseded);
            }
            result = self.send_with_retry(&request) => result,
        };

        self.commit(generation, result)
    }

    /// Cancels the in-flight request, if any. A `Loading` state returns to `Idle`.
    pub fn abort(&self) {
        let mut in_flight = self.lock_in_flight();
        in_flight.generation += 1;
        if let Some(token) = in_flight.token.take() {
            token.cancel();
            self.state.send_if_modified(|state| {
                if state.is_loading() {
                    *state = FetchState::Idle;
                    true
                } else {
                    false
                }
            });
        }
    }

    pub fn reset(&self) {
        let mut in_flight = self.lock_in_flight();
        in_flight.generation += 1;
        if let Some(token) = in_flight.token.take() {
            token.cancel();
        }
        self.state.send_replace(FetchState::Idle);
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Option<(u64, CancellationToken)> {
        let mut in_flight = self.lock_in_flight();
        if self.parent.is_cancelled() {
            return None;
        }

        in_flight.generation += 1;
        if let Some(previous) = in_flight.token.take() {
            tracing::debug!(
                generation = in_flight.generation - 1,
                "superseding in-flight request"
            );
            previous.cancel();
        }

        let token = self.parent.child_token();
        in_flight.token = Some(token.clone());
        self.state.send_replace(FetchState::Loading);
        Some((in_flight.generation, token))
    }

    /// Forgets the token of `generation` if no newer request replaced it.
    fn release(&self, generation: u64) {
        let mut in_flight = self.lock_in_flight();
        if in_flight.generation == generation {
            in_flight.token = None;
        }
    }

    fn commit(&self, generation: u64, result: Result<T>) -> Result<FetchOutcome<T>> {
        let mut in_flight = self.lock_in_flight();
        if in_flight.generation != generation {
            tracing::debug!(generation, "discarding stale response");
            return Ok(FetchOutcome::Superseded);
        }
        in_flight.token = None;
        if self.parent.is_cancelled() {
            tracing::debug!(generation, "scope closed, discarding response");
            return Ok(FetchOutcome::Superseded);
        }

        match result {
            Ok(data) => {
                self.state.send_replace(FetchState::Success(data.clone()));
                Ok(FetchOutcome::Completed(data))
            }
            Err(e) => {
                self.state.send_replace(FetchState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn send_with_retry(&self, request: &FetchRequest) -> Result<T> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_transient() && attempt < self.options.retry_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        "attempt {}/{} for {} failed: {}; retrying in {:?}",
                        attempt,
                        self.options.retry_attempts + 1,
                        request.url,
                        e,
                        self.options.retry_delay
                    );
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, request: &FetchRequest) -> Result<T> {
        let response: HttpResponse = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(FetchError::StatusError {
                status: response.status,
                body: response.text(),
            });
        }
        response.json()
    }
}

impl<T, Tr> Drop for Fetcher<T, Tr> {
    fn drop(&mut self) {
        let in_flight = self.in_flight.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = in_flight.token.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::HttpMethod;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use tokio::time::sleep;

    type Script = VecDeque<(Duration, Result<HttpResponse>)>;

    /// Replies per URL after a scripted delay and records every request.
    #[derive(Default)]
    struct ScriptedTransport {
        scripts: Mutex<HashMap<String, Script>>,
        seen: Mutex<Vec<FetchRequest>>,
    }

    impl ScriptedTransport {
        fn reply(self, url: &str, delay_ms: u64, response: Result<HttpResponse>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back((Duration::from_millis(delay_ms), response));
            self
        }

        fn seen(&self) -> Vec<FetchRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: &FetchRequest) -> Result<HttpResponse> {
            self.seen.lock().unwrap().push(request.clone());
            let (delay, response) = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&request.url)
                .and_then(|script| script.pop_front())
                .expect("no scripted response left");
            sleep(delay).await;
            response
        }
    }

    fn json(status: u16, body: serde_json::Value) -> Result<HttpResponse> {
        Ok(HttpResponse::new(status, body.to_string()))
    }

    fn fetcher(
        transport: ScriptedTransport,
        options: FetchOptions,
    ) -> Arc<Fetcher<String, ScriptedTransport>> {
        Arc::new(Fetcher::new(transport, options, CancellationToken::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_publishes_loading_then_success() {
        let transport = ScriptedTransport::default().reply("http://x/a", 20, json(200, "alpha".into()));
        let fetcher = fetcher(transport, FetchOptions::default());
        let mut states = fetcher.subscribe();

        let task = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.execute(FetchRequest::get("http://x/a")).await })
        };

        states.changed().await.unwrap();
        assert!(states.borrow_and_update().is_loading());
        assert!(fetcher.is_in_flight());

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, FetchOutcome::Completed("alpha".to_string()));
        assert_eq!(fetcher.state(), FetchState::Success("alpha".to_string()));
        assert!(!fetcher.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_request_supersedes_in_flight_one() {
        let transport = ScriptedTransport::default()
            .reply("http://x/slow", 100, json(200, "slow".into()))
            .reply("http://x/fast", 10, json(200, "fast".into()));
        let fetcher = fetcher(transport, FetchOptions::default());

        let first = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.execute(FetchRequest::get("http://x/slow")).await })
        };
        sleep(Duration::from_millis(1)).await;

        let second = fetcher.execute(FetchRequest::get("http://x/fast")).await.unwrap();
        assert_eq!(second, FetchOutcome::Completed("fast".to_string()));

        let first = first.await.unwrap().unwrap();
        assert!(first.is_superseded());

        // Outlive the slow response; state must still be the newer one.
        sleep(Duration::from_millis(200)).await;
        assert_eq!(fetcher.state(), FetchState::Success("fast".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_failure_does_not_overwrite_state() {
        let transport = ScriptedTransport::default()
            .reply("http://x/broken", 5, json(500, "boom".into()))
            .reply("http://x/ok", 50, json(200, "ok".into()));
        let fetcher = fetcher(transport, FetchOptions::default());

        let ok = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.execute(FetchRequest::get("http://x/ok")).await })
        };
        sleep(Duration::from_millis(1)).await;
        let broken = fetcher.execute(FetchRequest::get("http://x/broken")).await;

        assert!(matches!(broken, Err(FetchError::StatusError { status: 500, .. })));
        assert!(ok.await.unwrap().unwrap().is_superseded());
        assert!(fetcher.state().error().unwrap().contains("500"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutating_request_gets_idempotency_key() {
        let transport = ScriptedTransport::default()
            .reply("http://x/orders", 0, json(201, "created".into()))
            .reply("http://x/orders/1", 0, json(200, "order".into()));
        let fetcher = fetcher(transport, FetchOptions::default());

        fetcher
            .execute(FetchRequest::post("http://x/orders").json(serde_json::json!({"qty": 1})))
            .await
            .unwrap();
        fetcher
            .execute(FetchRequest::get("http://x/orders/1"))
            .await
            .unwrap();

        let seen = fetcher.transport().seen();
        let key = seen[0].idempotency_key.as_deref().unwrap();
        assert!(Uuid::parse_str(key).is_ok());
        assert_eq!(seen[1].idempotency_key, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_idempotency_key_is_kept() {
        let transport = ScriptedTransport::default().reply(
            "http://x/orders/7",
            0,
            json(200, "deleted".into()),
        );
        let fetcher = fetcher(transport, FetchOptions::default());

        let request =
            FetchRequest::new(HttpMethod::Delete, "http://x/orders/7").idempotency_key("fixed-key");
        fetcher.execute(request).await.unwrap();

        let seen = fetcher.transport().seen();
        assert_eq!(seen[0].idempotency_key.as_deref(), Some("fixed-key"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_reuse_idempotency_key() {
        let transport = ScriptedTransport::default()
            .reply("http://x/pay", 0, json(503, "busy".into()))
            .reply(
                "http://x/pay",
                0,
                Err(FetchError::TransportError {
                    message: "connection reset".to_string(),
                }),
            )
            .reply("http://x/pay", 0, json(200, "paid".into()));
        let options = FetchOptions {
            retry_attempts: 2,
            retry_delay: Duration::from_millis(100),
        };
        let fetcher = fetcher(transport, options);

        let started = tokio::time::Instant::now();
        let outcome = fetcher.execute(FetchRequest::post("http://x/pay")).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Completed("paid".to_string()));
        assert!(started.elapsed() >= Duration::from_millis(200));

        let seen = fetcher.transport().seen();
        assert_eq!(seen.len(), 3);
        let key = seen[0].idempotency_key.clone();
        assert!(key.is_some());
        assert!(seen.iter().all(|r| r.idempotency_key == key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_retry_delay_stops_further_attempts() {
        let transport = ScriptedTransport::default()
            .reply("http://x/pay", 0, json(503, "busy".into()))
            .reply("http://x/pay", 0, json(200, "paid".into()));
        let options = FetchOptions {
            retry_attempts: 1,
            retry_delay: Duration::from_millis(100),
        };
        let fetcher = fetcher(transport, options);

        let task = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.execute(FetchRequest::post("http://x/pay")).await })
        };
        sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.transport().seen().len(), 1);

        fetcher.abort();

        assert!(task.await.unwrap().unwrap().is_superseded());
        sleep(Duration::from_millis(500)).await;
        assert_eq!(fetcher.transport().seen().len(), 1);
        assert_eq!(fetcher.state(), FetchState::Idle);
        assert!(!fetcher.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_request_during_retry_delay_cancels_retry() {
        let transport = ScriptedTransport::default()
            .reply("http://x/a", 0, json(503, "busy".into()))
            .reply("http://x/a", 0, json(200, "a".into()))
            .reply("http://x/b", 0, json(200, "b".into()));
        let options = FetchOptions {
            retry_attempts: 1,
            retry_delay: Duration::from_millis(100),
        };
        let fetcher = fetcher(transport, options);

        let first = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.execute(FetchRequest::get("http://x/a")).await })
        };
        sleep(Duration::from_millis(50)).await;

        let second = fetcher.execute(FetchRequest::get("http://x/b")).await.unwrap();

        assert_eq!(second, FetchOutcome::Completed("b".to_string()));
        assert!(first.await.unwrap().unwrap().is_superseded());
        sleep(Duration::from_millis(500)).await;
        let urls: Vec<String> = fetcher.transport().seen().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["http://x/a", "http://x/b"]);
        assert_eq!(fetcher.state(), FetchState::Success("b".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let transport = ScriptedTransport::default()
            .reply("http://x/missing", 0, json(404, "missing".into()));
        let options = FetchOptions {
            retry_attempts: 3,
            retry_delay: Duration::from_millis(10),
        };
        let fetcher = fetcher(transport, options);

        let result = fetcher.execute(FetchRequest::get("http://x/missing")).await;

        assert!(matches!(result, Err(FetchError::StatusError { status: 404, .. })));
        assert_eq!(fetcher.transport().seen().len(), 1);
        assert!(fetcher.state().error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_body_fails() {
        let transport = ScriptedTransport::default().reply(
            "http://x/number",
            0,
            json(200, serde_json::json!({"not": "a string"})),
        );
        let fetcher = fetcher(transport, FetchOptions::default());

        let result = fetcher.execute(FetchRequest::get("http://x/number")).await;
        assert!(matches!(result, Err(FetchError::SerializationError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_cancels_and_returns_to_idle() {
        let transport = ScriptedTransport::default().reply("http://x/slow", 100, json(200, "late".into()));
        let fetcher = fetcher(transport, FetchOptions::default());

        let task = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.execute(FetchRequest::get("http://x/slow")).await })
        };
        sleep(Duration::from_millis(1)).await;
        assert!(fetcher.state().is_loading());

        fetcher.abort();

        assert!(task.await.unwrap().unwrap().is_superseded());
        assert_eq!(fetcher.state(), FetchState::Idle);
        assert!(!fetcher.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_previous_result() {
        let transport = ScriptedTransport::default().reply("http://x/a", 0, json(200, "a".into()));
        let fetcher = fetcher(transport, FetchOptions::default());

        fetcher.execute(FetchRequest::get("http://x/a")).await.unwrap();
        assert!(fetcher.state().data().is_some());

        fetcher.reset();
        assert_eq!(fetcher.state(), FetchState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_parent_blocks_new_requests() {
        let parent = CancellationToken::new();
        let transport = ScriptedTransport::default();
        let fetcher: Fetcher<String, _> =
            Fetcher::new(transport, FetchOptions::default(), parent.clone());

        parent.cancel();
        let outcome = fetcher.execute(FetchRequest::get("http://x/a")).await.unwrap();

        assert!(outcome.is_superseded());
        assert_eq!(fetcher.state(), FetchState::Idle);
        assert!(fetcher.transport().seen().is_empty());
    }

    #[test]
    fn test_options_from_config() {
        let mut config = FetchKitConfig::default();
        config.retry.attempts = 4;
        config.retry.delay_ms = 20;

        let options = FetchOptions::from_config(&config);
        assert_eq!(options.retry_attempts, 4);
        assert_eq!(options.retry_delay, Duration::from_millis(20));
    }
}
