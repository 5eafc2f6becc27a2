use crate::frame::ChannelOrder;
use crate::overlay::PresentedFrame;
use crate::presenter::{Presenter, PresenterError};
use opencv::{
    core::{Mat, Point, Scalar},
    highgui, imgproc,
    prelude::*,
};

const QUIT_KEY: i32 = 'q' as i32;

/// OpenCV window with the overlay drawn onto the frame. Pressing `q` stops the loop.
pub struct WindowPresenter {
    title: String,
}

impl WindowPresenter {
    pub fn new(title: impl Into<String>) -> Result<Self, PresenterError> {
        let title = title.into();
        highgui::named_window(&title, highgui::WINDOW_AUTOSIZE).map_err(display_error)?;
        Ok(Self { title })
    }

    fn draw(&self, presented: &PresentedFrame) -> opencv::Result<Mat> {
        let frame = &presented.frame;
        let bytes = frame.to_bytes(ChannelOrder::Bgr);
        let flat = Mat::from_slice(&bytes)?;
        let mut mat = flat.reshape(3, frame.height() as i32)?.try_clone()?;

        for line in &presented.lines {
            let (b, g, r) = line.kind.color_bgr();
            imgproc::put_text(
                &mut mat,
                &line.text,
                Point::new(line.x, line.y),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.7,
                Scalar::new(b as f64, g as f64, r as f64, 0.0),
                2,
                imgproc::LINE_AA,
                false,
            )?;
        }
        Ok(mat)
    }
}

fn display_error(err: opencv::Error) -> PresenterError {
    PresenterError::DisplayFailed(err.to_string())
}

impl Presenter for WindowPresenter {
    fn present(&mut self, presented: &PresentedFrame) -> Result<bool, PresenterError> {
        let mat = self.draw(presented).map_err(display_error)?;
        highgui::imshow(&self.title, &mat).map_err(display_error)?;

        let key = highgui::wait_key(1).map_err(display_error)?;
        Ok(key & 0xFF != QUIT_KEY)
    }
}

impl Drop for WindowPresenter {
    fn drop(&mut self) {
        if let Err(e) = highgui::destroy_all_windows() {
            tracing::warn!("Failed to close window: {}", e);
        }
    }
}
