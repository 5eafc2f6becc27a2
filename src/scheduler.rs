use crate::cache::ResultCache;
use crate::inference::InferenceClient;
use crate::model_service::VisionModel;
use crate::preprocess::PreprocessedImage;
use crate::telemetry::Metrics;
use std::sync::Arc;
use tokio::{
    sync::Semaphore,
    time::{Duration, Instant},
};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(4500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    /// Stamped when a task is launched. Completion leaves it alone.
    pub last_invoked_at: Option<Instant>,
    pub min_interval: Duration,
}

impl ScheduleState {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_invoked_at: None,
            min_interval,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_invoked_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.min_interval,
        }
    }
}

/// Decides once per tick whether to dispatch a new inference call.
///
/// Calls run on a single-slot pool: a launch must take the only permit of a
/// semaphore and the permit travels with the spawned task, so two calls can
/// never be in flight at once. There is no queue and no cancellation. A call
/// that never returns keeps the permit and blocks all further dispatch, so the
/// transport timeout is the only bound.
pub struct InferenceScheduler<M: VisionModel> {
    client: Arc<InferenceClient<M>>,
    cache: Arc<ResultCache>,
    slot: Arc<Semaphore>,
    state: ScheduleState,
    launched: u64,
    metrics: Option<Arc<Metrics>>,
}

impl<M: VisionModel> InferenceScheduler<M> {
    pub fn new(
        client: Arc<InferenceClient<M>>,
        cache: Arc<ResultCache>,
        min_interval: Duration,
    ) -> Self {
        Self {
            client,
            cache,
            slot: Arc::new(Semaphore::new(1)),
            state: ScheduleState::new(min_interval),
            launched: 0,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// True when a call to [`maybe_infer`](Self::maybe_infer) right now would launch.
    pub fn ready(&self) -> bool {
        self.state.is_due(Instant::now()) && !self.in_flight()
    }

    pub fn in_flight(&self) -> bool {
        self.slot.available_permits() == 0
    }

    pub fn launched(&self) -> u64 {
        self.launched
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    /// Spawns an inference call for `image` if the interval has elapsed and
    /// the slot is free. Returns whether a call was launched. Never waits on
    /// the call; its result lands in the cache when it completes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn maybe_infer(&mut self, image: PreprocessedImage) -> bool {
        let now = Instant::now();
        if !self.state.is_due(now) {
            return false;
        }

        let permit = match self.slot.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::trace!("Inference still in flight, skipping tick");
                return false;
            }
        };

        self.state.last_invoked_at = Some(now);
        self.launched += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_launch();
        }
        tracing::debug!(launch = self.launched, "Dispatching inference");

        let client = self.client.clone();
        let cache = self.cache.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let result = client.infer(&image).await;

            if let Some(metrics) = metrics {
                metrics.record_inference(started.elapsed().as_millis() as u64, result.status.label());
            }
            cache.write(result);
            drop(permit);
        });

        true
    }
}
