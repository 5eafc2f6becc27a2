use crate::overlay::PresentedFrame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PresenterError {
    #[error("Failed to display frame: {0}")]
    DisplayFailed(String),
}

/// Shows a rendered frame. The returned flag is the loop's "keep running"
/// signal; `false` asks the render loop to stop.
pub trait Presenter {
    fn present(&mut self, frame: &PresentedFrame) -> Result<bool, PresenterError>;
}

impl Presenter for Box<dyn Presenter> {
    fn present(&mut self, frame: &PresentedFrame) -> Result<bool, PresenterError> {
        (**self).present(frame)
    }
}

/// Text panel: logs the overlay whenever its text changes.
#[derive(Debug, Default)]
pub struct ConsolePresenter {
    last: Vec<String>,
    updates: u64,
}

impl ConsolePresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }
}

impl Presenter for ConsolePresenter {
    fn present(&mut self, frame: &PresentedFrame) -> Result<bool, PresenterError> {
        let texts = frame.texts();
        if texts != self.last {
            self.updates += 1;
            self.last = texts.iter().map(|t| t.to_string()).collect();
            tracing::info!(
                width = frame.frame.width(),
                height = frame.frame.height(),
                overlay = ?self.last,
                "Overlay updated"
            );
        }
        Ok(true)
    }
}
