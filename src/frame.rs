use image::{Rgb, RgbImage};
use thiserror::Error;

/// Byte order of the three colour channels in a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

#[derive(Error, Debug)]
pub enum FrameSourceError {
    #[error("Failed to open frame source: {0}")]
    OpenFailed(String),
    #[error("Failed to read frame: {0}")]
    ReadFailed(String),
    #[error("Unsupported frame layout: {0}")]
    UnsupportedLayout(String),
}

/// One captured picture. Lives for a single tick of the render loop.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    order: ChannelOrder,
}

impl Frame {
    pub fn new(image: RgbImage, order: ChannelOrder) -> Self {
        Self { image, order }
    }

    /// Wraps a packed 3-channel buffer. Returns `None` when the length does not
    /// match `width * height * 3`.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>, order: ChannelOrder) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(|image| Self { image, order })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed bytes in the requested channel order.
    pub fn to_bytes(&self, order: ChannelOrder) -> Vec<u8> {
        let mut bytes = self.image.as_raw().clone();
        if order != self.order {
            for pixel in bytes.chunks_exact_mut(3) {
                pixel.swap(0, 2);
            }
        }
        bytes
    }
}

/// Supplies successive frames to the render loop.
///
/// `Ok(None)` signals that no more frames are available, which ends the loop
/// normally.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError>;
}

impl FrameSource for Box<dyn FrameSource> {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        (**self).next_frame()
    }
}

/// Generates a moving gradient. Used for headless runs and tests.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    width: u32,
    height: u32,
    limit: Option<u64>,
    produced: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            limit: None,
            produced: 0,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_optional_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }

        let shift = self.produced as u32;
        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                (x.wrapping_add(shift) % 256) as u8,
                (y % 256) as u8,
                (shift % 256) as u8,
            ])
        });
        self.produced += 1;

        Ok(Some(Frame::new(image, ChannelOrder::Rgb)))
    }
}
