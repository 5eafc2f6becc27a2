mod routes;
mod server;

pub mod app;
pub mod cache;
#[cfg(feature = "opencv")]
pub mod camera;
pub mod config;
pub mod frame;
pub mod inference;
pub mod model_service;
pub mod overlay;
pub mod preprocess;
pub mod presenter;
pub mod scheduler;
pub mod telemetry;
#[cfg(feature = "opencv")]
pub mod window;

pub use app::start_app;
