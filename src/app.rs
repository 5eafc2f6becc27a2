use crate::cache::ResultCache;
use crate::config::{
    CameraConfig, Config, InferenceConfig, ModelBackend, PresenterKind, RenderConfig, SourceKind,
};
use crate::frame::{FrameSource, FrameSourceError, SyntheticSource};
use crate::inference::InferenceClient;
use crate::model_service::{CannedModel, GeminiModel, ModelServiceError, VisionModel};
use crate::overlay;
use crate::preprocess::preprocess;
use crate::presenter::{ConsolePresenter, Presenter, PresenterError};
use crate::scheduler::InferenceScheduler;
use crate::server::{HttpServer, SharedState};
use crate::telemetry::{Metrics, TelemetryError};

use std::sync::Arc;
use thiserror::Error;
use tokio::{
    signal,
    sync::broadcast,
    time::{interval, Duration, Instant, Interval, MissedTickBehavior},
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Frame source error: {0}")]
    FrameSource(#[from] FrameSourceError),
    #[error("Presenter error: {0}")]
    Presenter(#[from] PresenterError),
    #[error("Model service error: {0}")]
    ModelService(#[from] ModelServiceError),
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("No API key: set inference.api_key or GOOGLE_API_KEY")]
    MissingApiKey,
    #[error("`{0}` needs the `opencv` feature")]
    FeatureDisabled(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub resize_width: u32,
    /// Pause between ticks. Zero means run as fast as frames arrive.
    pub tick: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_rendered: u64,
    pub inferences_launched: u64,
}

/// Renders every frame while inference runs beside it at a coarser rate.
pub struct OverlayLoop<S: FrameSource, P: Presenter, M: VisionModel> {
    source: S,
    presenter: P,
    scheduler: InferenceScheduler<M>,
    cache: Arc<ResultCache>,
    settings: LoopSettings,
    metrics: Option<Arc<Metrics>>,
}

impl<S: FrameSource, P: Presenter, M: VisionModel> OverlayLoop<S, P, M> {
    pub fn new(
        source: S,
        presenter: P,
        scheduler: InferenceScheduler<M>,
        cache: Arc<ResultCache>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            presenter,
            scheduler,
            cache,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs until the source runs dry, the presenter asks to stop, or a
    /// shutdown signal arrives. In-flight inference is left to finish on its own.
    pub async fn run(
        mut self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<LoopStats, AppError> {
        let mut ticker = self.ticker().await;
        let mut stats = LoopStats::default();
        let mut fps_window = (Instant::now(), 0u64);

        loop {
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("Frame source exhausted");
                    break;
                }
                Err(e) => {
                    tracing::error!("Error getting frame: {}", e);
                    break;
                }
            };

            if self.scheduler.ready() {
                let image = preprocess(&frame, self.settings.resize_width);
                self.scheduler.maybe_infer(image);
            }

            let entry = self.cache.read();
            let presented = overlay::render(frame, &entry);
            stats.frames_rendered += 1;

            if !self.presenter.present(&presented)? {
                tracing::info!("Presenter requested stop");
                break;
            }

            self.record_fps(&mut fps_window);

            let wait = async {
                match ticker.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => tokio::task::yield_now().await,
                }
            };

            tokio::select! {
                _ = wait => {},
                _ = shutdown_rx.recv() => {
                    tracing::info!("Render loop received shutdown signal");
                    break;
                }
            }
        }

        stats.inferences_launched = self.scheduler.launched();
        Ok(stats)
    }

    async fn ticker(&self) -> Option<Interval> {
        if self.settings.tick.is_zero() {
            return None;
        }
        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        Some(ticker)
    }

    fn record_fps(&self, window: &mut (Instant, u64)) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        window.1 += 1;
        let elapsed = window.0.elapsed();
        if elapsed >= Duration::from_secs(1) {
            metrics.record_render_fps(window.1 as f64 / elapsed.as_secs_f64());
            *window = (Instant::now(), 0);
        }
    }
}

fn build_model(config: &InferenceConfig) -> Result<Box<dyn VisionModel>, AppError> {
    match config.backend {
        ModelBackend::Gemini => {
            let api_key = config.resolve_api_key().ok_or(AppError::MissingApiKey)?;
            Ok(Box::new(GeminiModel::new(config, api_key)?))
        }
        ModelBackend::Offline => {
            tracing::warn!("Using the offline model, results are canned");
            Ok(Box::new(CannedModel::demo()))
        }
    }
}

fn build_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>, AppError> {
    match config.source {
        SourceKind::Synthetic => Ok(Box::new(
            SyntheticSource::new(config.width, config.height).with_optional_limit(config.max_frames),
        )),
        #[cfg(feature = "opencv")]
        SourceKind::Camera => {
            let camera = crate::camera::CameraSource::new(config).map_err(FrameSourceError::from)?;
            Ok(Box::new(camera))
        }
        #[cfg(not(feature = "opencv"))]
        SourceKind::Camera => Err(AppError::FeatureDisabled("camera.source = camera")),
    }
}

fn build_presenter(config: &RenderConfig) -> Result<Box<dyn Presenter>, AppError> {
    match config.presenter {
        PresenterKind::Console => Ok(Box::new(ConsolePresenter::new())),
        #[cfg(feature = "opencv")]
        PresenterKind::Window => Ok(Box::new(crate::window::WindowPresenter::new("Live Camera")?)),
        #[cfg(not(feature = "opencv"))]
        PresenterKind::Window => Err(AppError::FeatureDisabled("render.presenter = window")),
    }
}

pub async fn start_app(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = Arc::new(Metrics::new()?);
    let cache = Arc::new(ResultCache::new());

    let model = match build_model(&config.inference) {
        Ok(model) => model,
        Err(e) => {
            tracing::error!("Failed to initialize inference model: {}", e);
            return Err(Box::new(e));
        }
    };
    let client = Arc::new(InferenceClient::new(model));
    let scheduler = InferenceScheduler::new(client, cache.clone(), config.inference.min_interval())
        .with_metrics(metrics.clone());

    let source = match build_source(&config.camera) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!("Failed to initialize frame source: {}", e);
            return Err(Box::new(e));
        }
    };
    let presenter = build_presenter(&config.render)?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let loop_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = if config.server.enabled {
        let state = SharedState {
            cache: cache.clone(),
            metrics: metrics.clone(),
        };
        let server = HttpServer::new(state, &config.server).await?;
        Some(server.run(shutdown_tx.subscribe()).await?)
    } else {
        None
    };

    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown.");
            let _ = shutdown_tx.send(());
        }
    });

    let settings = LoopSettings {
        resize_width: config.inference.resize_width,
        tick: config.render.tick(),
    };
    let stats = OverlayLoop::new(source, presenter, scheduler, cache, settings)
        .with_metrics(metrics)
        .run(loop_shutdown_rx)
        .await?;
    tracing::info!(
        frames = stats.frames_rendered,
        inferences = stats.inferences_launched,
        "Render loop stopped"
    );

    let _ = shutdown_tx.send(());
    if let Some(handle) = server_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::PresentedFrame;

    struct StopAfter {
        remaining: u32,
    }

    impl Presenter for StopAfter {
        fn present(&mut self, _frame: &PresentedFrame) -> Result<bool, PresenterError> {
            self.remaining -= 1;
            Ok(self.remaining > 0)
        }
    }

    struct Broken;

    impl FrameSource for Broken {
        fn next_frame(
            &mut self,
        ) -> Result<Option<crate::frame::Frame>, FrameSourceError> {
            Err(FrameSourceError::ReadFailed("device unplugged".into()))
        }
    }

    fn scheduler(cache: &Arc<ResultCache>) -> InferenceScheduler<CannedModel> {
        InferenceScheduler::new(
            Arc::new(InferenceClient::new(CannedModel::new("{}"))),
            cache.clone(),
            Duration::from_secs(60),
        )
    }

    const SETTINGS: LoopSettings = LoopSettings {
        resize_width: 16,
        tick: Duration::ZERO,
    };

    #[tokio::test]
    async fn test_presenter_can_stop_the_loop() {
        let cache = Arc::new(ResultCache::new());
        let (_tx, rx) = broadcast::channel(1);

        let stats = OverlayLoop::new(
            SyntheticSource::new(32, 24),
            StopAfter { remaining: 4 },
            scheduler(&cache),
            cache.clone(),
            SETTINGS,
        )
        .run(rx)
        .await
        .unwrap();

        assert_eq!(stats.frames_rendered, 4);
        assert_eq!(stats.inferences_launched, 1);
    }

    #[tokio::test]
    async fn test_source_error_ends_loop() {
        let cache = Arc::new(ResultCache::new());
        let (_tx, rx) = broadcast::channel(1);

        let stats = OverlayLoop::new(
            Broken,
            ConsolePresenter::new(),
            scheduler(&cache),
            cache.clone(),
            SETTINGS,
        )
        .run(rx)
        .await
        .unwrap();

        assert_eq!(stats, LoopStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_signal_stops_endless_source() {
        let cache = Arc::new(ResultCache::new());
        let (tx, rx) = broadcast::channel(1);
        let settings = LoopSettings {
            resize_width: 16,
            tick: Duration::from_millis(30),
        };

        let handle = tokio::spawn(async move {
            OverlayLoop::new(
                SyntheticSource::new(32, 24),
                ConsolePresenter::new(),
                scheduler(&cache),
                cache.clone(),
                settings,
            )
            .run(rx)
            .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert!(stats.frames_rendered >= 3);
    }

    #[test]
    fn test_gemini_backend_needs_a_key() {
        let config = InferenceConfig {
            api_key: Some(" ".into()),
            ..InferenceConfig::default()
        };
        if std::env::var(crate::config::API_KEY_ENV).is_err() {
            assert!(matches!(build_model(&config), Err(AppError::MissingApiKey)));
        }

        let offline = InferenceConfig {
            backend: ModelBackend::Offline,
            ..InferenceConfig::default()
        };
        assert!(build_model(&offline).is_ok());
    }

    #[test]
    fn test_shipped_local_config_starts_without_extras() {
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("configuration");
        let config = crate::config::load_configuration(&dir, crate::config::Environment::Local)
            .unwrap();

        let mut source = build_source(&config.camera).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(build_presenter(&config.render).is_ok());
        assert!(build_model(&config.inference).is_ok());
    }

    #[test]
    fn test_synthetic_source_is_always_available() {
        let config = CameraConfig {
            source: SourceKind::Synthetic,
            max_frames: Some(1),
            ..CameraConfig::default()
        };
        let mut source = build_source(&config).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }
}
