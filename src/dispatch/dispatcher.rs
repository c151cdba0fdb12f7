//! The dispatcher: the single gateway to the reasoning service.
//!
//! A worker task owns the priority queue, the per-tier rate windows, and
//! the dequeue policy, so every scheduling decision is made by one logical
//! owner even though many jobs submit concurrently. Callers interact
//! through cheap clone-able handles: submit an mpsc message, await a
//! oneshot reply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tracing::debug;

use super::breaker::{CircuitBreaker, CircuitPhase};
use super::limiter::RateLimiter;
use super::queue::PriorityQueue;
use super::ticket::DispatchTicket;
use crate::config::DispatchConfig;
use crate::provider::{CallOutput, ProviderError, ReasoningProvider};
use crate::tier::Tier;

/// How a dispatch can fail without an answer from the service.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The queue is saturated; the caller should back off and resubmit.
    #[error("dispatch queue saturated")]
    RateLimited,

    /// The tier's circuit is open; no call was attempted.
    #[error("circuit open for tier {0}")]
    CircuitOpen(Tier),

    /// The service answered with a failure.
    #[error("provider error: {0}")]
    Provider(ProviderError),

    /// The call overran the dispatcher's per-call deadline.
    #[error("call exceeded the dispatch timeout")]
    Timeout,
}

impl DispatchError {
    /// Whether the budget reserved for this call should be refunded.
    /// Only caller-side request defects keep the budget consumed.
    pub fn refundable(&self) -> bool {
        match self {
            DispatchError::Provider(e) => e.retriable(),
            _ => true,
        }
    }
}

struct Submission {
    ticket: DispatchTicket,
    reply: oneshot::Sender<Result<CallOutput, DispatchError>>,
}

/// Clone-able handle to the dispatcher worker.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Submission>,
    breakers: Arc<HashMap<Tier, CircuitBreaker>>,
}

impl Dispatcher {
    /// Builds the shared state and spawns the worker task.
    pub fn new(provider: Arc<dyn ReasoningProvider>, config: &DispatchConfig) -> Self {
        let mut breakers = HashMap::new();
        for tier in Tier::ALL {
            if tier.is_paid() {
                breakers.insert(
                    tier,
                    CircuitBreaker::new(
                        tier,
                        config.breaker_failure_threshold,
                        Duration::from_secs(config.breaker_cooldown_secs),
                    ),
                );
            }
        }
        let breakers = Arc::new(breakers);

        let (tx, rx) = mpsc::channel(64);
        let worker = Worker {
            rx,
            queue: PriorityQueue::new(config.queue_capacity),
            limiter: RateLimiter::new(config),
            breakers: Arc::clone(&breakers),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight)),
            provider,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        };
        tokio::spawn(worker.run());

        Self { tx, breakers }
    }

    /// Submits a ticket and waits for its result.
    ///
    /// An open circuit rejects immediately, before the ticket is queued.
    /// Rate-limited tickets are held in queue, not rejected, unless the
    /// queue itself is saturated.
    pub async fn dispatch(&self, ticket: DispatchTicket) -> Result<CallOutput, DispatchError> {
        if let Some(breaker) = self.breakers.get(&ticket.tier)
            && !breaker.would_admit()
        {
            return Err(DispatchError::CircuitOpen(ticket.tier));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Submission {
                ticket,
                reply: reply_tx,
            })
            .await
            .map_err(|_| DispatchError::RateLimited)?;

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::RateLimited),
        }
    }

    /// Current breaker phase for a tier, for observability.
    pub fn circuit_phase(&self, tier: Tier) -> Option<CircuitPhase> {
        self.breakers.get(&tier).map(CircuitBreaker::phase)
    }
}

struct Worker {
    rx: mpsc::Receiver<Submission>,
    queue: PriorityQueue<Submission>,
    limiter: RateLimiter,
    breakers: Arc<HashMap<Tier, CircuitBreaker>>,
    in_flight: Arc<Semaphore>,
    provider: Arc<dyn ReasoningProvider>,
    call_timeout: Duration,
}

impl Worker {
    /// Re-examine held tickets this often; covers rate windows replenishing
    /// and in-flight slots freeing, neither of which wakes the worker.
    const TICK: Duration = Duration::from_millis(50);

    async fn run(mut self) {
        loop {
            loop {
                match self.rx.try_recv() {
                    Ok(sub) => self.enqueue(sub),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => return,
                }
            }

            self.pump();

            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(sub) => self.enqueue(sub),
                    None => return,
                },
                _ = tokio::time::sleep(Self::TICK), if !self.queue.is_empty() => {}
            }
        }
    }

    fn enqueue(&mut self, sub: Submission) {
        let priority = sub.ticket.priority;
        if let Err(refused) = self.queue.push(priority, sub) {
            debug!(%priority, "queue saturated, bouncing ticket");
            let _ = refused.reply.send(Err(DispatchError::RateLimited));
        }
    }

    /// Starts every ticket that is ready while in-flight slots remain.
    fn pump(&mut self) {
        loop {
            let Ok(permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
                return;
            };

            let Worker {
                queue,
                limiter,
                breakers,
                ..
            } = self;
            let picked = queue.pick(|sub| {
                limiter.would_allow(sub.ticket.tier)
                    && breakers
                        .get(&sub.ticket.tier)
                        .is_none_or(CircuitBreaker::would_admit)
            });
            let Some(sub) = picked else {
                return;
            };

            let tier = sub.ticket.tier;
            // Commit the admission. The worker is the only scheduler, but a
            // completing call may flip the breaker between peek and commit;
            // bounce the ticket if it did.
            if let Some(breaker) = self.breakers.get(&tier)
                && !breaker.admit()
            {
                let _ = sub.reply.send(Err(DispatchError::CircuitOpen(tier)));
                continue;
            }
            self.limiter.record_start(tier);
            self.spawn_call(sub, permit);
        }
    }

    fn spawn_call(&self, sub: Submission, permit: OwnedSemaphorePermit) {
        let provider = Arc::clone(&self.provider);
        let breakers = Arc::clone(&self.breakers);
        let call_timeout = self.call_timeout;

        tokio::spawn(async move {
            let Submission { ticket, reply } = sub;
            let tier = ticket.tier;
            debug!(%tier, priority = %ticket.priority, "dispatching call");

            let result =
                tokio::time::timeout(call_timeout, provider.call(tier, &ticket.payload)).await;
            let outcome = match result {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(DispatchError::Provider(e)),
                Err(_) => Err(DispatchError::Timeout),
            };

            // Every completed dispatch lands in the outcome window. A
            // malformed request is a caller defect and does not count
            // against provider health.
            let healthy = match &outcome {
                Ok(_) => true,
                Err(DispatchError::Provider(e)) => !e.retriable(),
                Err(_) => false,
            };
            if let Some(breaker) = breakers.get(&tier) {
                breaker.record(healthy);
            }

            let _ = reply.send(outcome);
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ticket::Priority;
    use crate::provider::CallPayload;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload(text: &str) -> CallPayload {
        CallPayload {
            document_id: "doc".into(),
            segment_index: 0,
            text: text.into(),
        }
    }

    fn output() -> CallOutput {
        CallOutput {
            text: r#"{"candidates": []}"#.into(),
            cost: 0.001,
            latency_ms: 5,
        }
    }

    // Rate ceilings high enough that these tests exercise the queue,
    // breaker, and concurrency paths without tripping the limiter; the
    // limiter itself is covered by its own tests.
    fn config() -> DispatchConfig {
        DispatchConfig {
            rate_limit_small: 1000,
            rate_limit_big: 1000,
            ..DispatchConfig::default()
        }
    }

    /// Provider that fails or succeeds per a fixed plan and counts calls.
    struct ScriptedProvider {
        fail: bool,
        malformed: bool,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn succeeding() -> Self {
            Self {
                fail: false,
                malformed: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                malformed: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn malformed() -> Self {
            Self {
                fail: false,
                malformed: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReasoningProvider for ScriptedProvider {
        async fn call(
            &self,
            _tier: Tier,
            _payload: &CallPayload,
        ) -> Result<CallOutput, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.malformed {
                return Err(ProviderError::Malformed {
                    status: 400,
                    message: "bad request".into(),
                });
            }
            if self.fail {
                return Err(ProviderError::Api {
                    status: 500,
                    message: "server error".into(),
                });
            }
            Ok(output())
        }
    }

    /// Provider that records call order and blocks until released.
    struct GatedProvider {
        gate: Arc<Semaphore>,
        started: Mutex<Vec<String>>,
    }

    impl GatedProvider {
        fn new() -> Self {
            Self {
                gate: Arc::new(Semaphore::new(0)),
                started: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReasoningProvider for GatedProvider {
        async fn call(
            &self,
            _tier: Tier,
            payload: &CallPayload,
        ) -> Result<CallOutput, ProviderError> {
            self.started.lock().unwrap().push(payload.text.clone());
            let _permit = self.gate.acquire().await.expect("gate closed");
            Ok(output())
        }
    }

    #[tokio::test]
    async fn successful_dispatch_returns_output() {
        let provider = Arc::new(ScriptedProvider::succeeding());
        let dispatcher = Dispatcher::new(provider.clone(), &config());

        let ticket = DispatchTicket::new(Tier::Small, payload("hello"), Priority::P1);
        let result = dispatcher.dispatch(ticket).await.unwrap();

        assert_eq!(result.text, r#"{"candidates": []}"#);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_rejects_without_calling() {
        let provider = Arc::new(ScriptedProvider::failing());
        let dispatcher = Dispatcher::new(provider.clone(), &config());

        for _ in 0..30 {
            let ticket = DispatchTicket::new(Tier::Big, payload("x"), Priority::P1);
            let err = dispatcher.dispatch(ticket).await.unwrap_err();
            assert!(matches!(err, DispatchError::Provider(_)));
        }
        assert_eq!(dispatcher.circuit_phase(Tier::Big), Some(CircuitPhase::Open));

        let ticket = DispatchTicket::new(Tier::Big, payload("x"), Priority::P1);
        let err = dispatcher.dispatch(ticket).await.unwrap_err();
        assert!(matches!(err, DispatchError::CircuitOpen(Tier::Big)));
        // The rejected dispatch never reached the provider.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 30);
    }

    #[tokio::test]
    async fn breakers_are_independent_per_tier() {
        let provider = Arc::new(ScriptedProvider::failing());
        let dispatcher = Dispatcher::new(provider.clone(), &config());

        for _ in 0..30 {
            let ticket = DispatchTicket::new(Tier::Big, payload("x"), Priority::P1);
            let _ = dispatcher.dispatch(ticket).await;
        }
        assert_eq!(dispatcher.circuit_phase(Tier::Big), Some(CircuitPhase::Open));
        assert_eq!(
            dispatcher.circuit_phase(Tier::Small),
            Some(CircuitPhase::Closed)
        );

        // SMALL traffic still reaches the provider.
        let before = provider.calls.load(Ordering::SeqCst);
        let ticket = DispatchTicket::new(Tier::Small, payload("y"), Priority::P1);
        let _ = dispatcher.dispatch(ticket).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn malformed_requests_do_not_trip_the_breaker() {
        let provider = Arc::new(ScriptedProvider::malformed());
        let dispatcher = Dispatcher::new(provider.clone(), &config());

        for _ in 0..35 {
            let ticket = DispatchTicket::new(Tier::Small, payload("x"), Priority::P1);
            let err = dispatcher.dispatch(ticket).await.unwrap_err();
            assert!(!err.refundable());
        }
        assert_eq!(
            dispatcher.circuit_phase(Tier::Small),
            Some(CircuitPhase::Closed)
        );
    }

    #[tokio::test]
    async fn strict_priority_order_with_fifo_within_level() {
        let provider = Arc::new(GatedProvider::new());
        let cfg = DispatchConfig {
            max_in_flight: 1,
            ..config()
        };
        let dispatcher = Dispatcher::new(provider.clone(), &cfg);

        // Occupy the only slot.
        let d = dispatcher.clone();
        let first = tokio::spawn(async move {
            d.dispatch(DispatchTicket::new(
                Tier::Small,
                payload("blocker"),
                Priority::P1,
            ))
            .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Queue in mixed priority order.
        let mut handles = Vec::new();
        for (text, priority) in [
            ("p2-a", Priority::P2),
            ("p2-b", Priority::P2),
            ("p1-a", Priority::P1),
            ("p0-a", Priority::P0),
        ] {
            let d = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                d.dispatch(DispatchTicket::new(Tier::Small, payload(text), priority))
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        provider.gate.add_permits(5);
        first.await.unwrap().unwrap();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let started = provider.started.lock().unwrap().clone();
        assert_eq!(started, vec!["blocker", "p0-a", "p1-a", "p2-a", "p2-b"]);
    }

    #[tokio::test]
    async fn in_flight_ceiling_is_enforced() {
        let provider = Arc::new(GatedProvider::new());
        let cfg = DispatchConfig {
            max_in_flight: 2,
            ..config()
        };
        let dispatcher = Dispatcher::new(provider.clone(), &cfg);

        let mut handles = Vec::new();
        for i in 0..3 {
            let d = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                d.dispatch(DispatchTicket::new(
                    Tier::Small,
                    payload(&format!("call-{i}")),
                    Priority::P1,
                ))
                .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Only two calls may be in flight.
        assert_eq!(provider.started.lock().unwrap().len(), 2);

        provider.gate.add_permits(3);
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(provider.started.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn saturated_queue_rejects_with_rate_limited() {
        let provider = Arc::new(GatedProvider::new());
        let cfg = DispatchConfig {
            max_in_flight: 1,
            queue_capacity: 1,
            ..config()
        };
        let dispatcher = Dispatcher::new(provider.clone(), &cfg);

        // First occupies the slot, second fills the P1 level.
        let d1 = dispatcher.clone();
        let h1 = tokio::spawn(async move {
            d1.dispatch(DispatchTicket::new(Tier::Small, payload("a"), Priority::P1))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let d2 = dispatcher.clone();
        let h2 = tokio::spawn(async move {
            d2.dispatch(DispatchTicket::new(Tier::Small, payload("b"), Priority::P1))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = dispatcher
            .dispatch(DispatchTicket::new(Tier::Small, payload("c"), Priority::P1))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::RateLimited));
        assert!(err.refundable());

        provider.gate.add_permits(2);
        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out_and_frees_its_slot() {
        struct HangingProvider;

        #[async_trait]
        impl ReasoningProvider for HangingProvider {
            async fn call(
                &self,
                _tier: Tier,
                _payload: &CallPayload,
            ) -> Result<CallOutput, ProviderError> {
                std::future::pending().await
            }
        }

        let cfg = DispatchConfig {
            max_in_flight: 1,
            call_timeout_secs: 5,
            ..config()
        };
        let dispatcher = Dispatcher::new(Arc::new(HangingProvider), &cfg);

        let err = dispatcher
            .dispatch(DispatchTicket::new(Tier::Big, payload("x"), Priority::P1))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout));
        assert!(err.refundable());
    }
}
