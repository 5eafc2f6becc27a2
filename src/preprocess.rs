use crate::frame::{ChannelOrder, Frame};
use image::{imageops, imageops::FilterType, ImageFormat, RgbImage};
use std::io::Cursor;

pub const DEFAULT_RESIZE_WIDTH: u32 = 800;
/// Tallest output allowed, as a multiple of the target width.
pub const MAX_HEIGHT_RATIO: u32 = 4;

/// Downsized RGB copy of a frame, owned by the tick that produced it and
/// handed to a single inference call.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    image: RgbImage,
}

impl PreprocessedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn to_jpeg(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)?;
        Ok(buf)
    }
}

/// Height that keeps the aspect ratio at `target_width`, clamped to
/// `1..=target_width * MAX_HEIGHT_RATIO` so very tall frames cannot blow up the
/// resize buffer. Frames taller than that ratio are squashed.
pub fn target_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled = (target_width as f64 * height as f64 / width as f64).round();
    let max = target_width.saturating_mul(MAX_HEIGHT_RATIO).max(1);
    (scaled as u32).clamp(1, max)
}

/// Resizes `frame` to `target_width`, keeping the aspect ratio, and puts the
/// channels in RGB order.
///
/// # Panics
///
/// Panics on a frame with zero width or height. Output height is capped at
/// `MAX_HEIGHT_RATIO` times the target width.
pub fn preprocess(frame: &Frame, target_width: u32) -> PreprocessedImage {
    assert!(
        frame.width() > 0 && frame.height() > 0,
        "cannot preprocess an empty {}x{} frame",
        frame.width(),
        frame.height()
    );

    let height = target_height(frame.width(), frame.height(), target_width);
    let mut image = imageops::resize(frame.image(), target_width, height, FilterType::Triangle);

    if frame.order() == ChannelOrder::Bgr {
        for pixel in image.pixels_mut() {
            pixel.0.swap(0, 2);
        }
    }

    PreprocessedImage { image }
}
