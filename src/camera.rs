use crate::config::CameraConfig;
use crate::frame::{ChannelOrder, Frame, FrameSource, FrameSourceError};
use opencv::{core, core::Mat, prelude::*, videoio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("Camera {0} is not available")]
    NotOpened(i32),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Unexpected frame type {0}, expected 8-bit BGR")]
    UnexpectedFrameType(i32),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CameraError {
    fn from(err: opencv::Error) -> Self {
        CameraError::OpenCvError(err)
    }
}

impl From<CameraError> for FrameSourceError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::OpenCameraFailed(_) | CameraError::NotOpened(_) => {
                FrameSourceError::OpenFailed(err.to_string())
            }
            CameraError::UnexpectedFrameType(_) => {
                FrameSourceError::UnsupportedLayout(err.to_string())
            }
            _ => FrameSourceError::ReadFailed(err.to_string()),
        }
    }
}

/// Webcam frames through OpenCV. Frames come out in BGR order.
pub struct CameraSource {
    capture: videoio::VideoCapture,
}

impl CameraSource {
    pub fn new(config: &CameraConfig) -> Result<Self, CameraError> {
        let mut capture = videoio::VideoCapture::new(config.device, videoio::CAP_ANY)
            .map_err(CameraError::OpenCameraFailed)?;
        if !capture.is_opened()? {
            return Err(CameraError::NotOpened(config.device));
        }

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)?;
        tracing::info!(
            device = config.device,
            width = config.width,
            height = config.height,
            "Camera opened"
        );

        Ok(Self { capture })
    }

    fn capture_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let mut mat = Mat::default();
        let grabbed = self
            .capture
            .read(&mut mat)
            .map_err(CameraError::ReadFrameFailed)?;
        if !grabbed || mat.empty() {
            return Ok(None);
        }
        mat_to_frame(&mat).map(Some)
    }
}

fn mat_to_frame(mat: &Mat) -> Result<Frame, CameraError> {
    if mat.typ() != core::CV_8UC3 {
        return Err(CameraError::UnexpectedFrameType(mat.typ()));
    }

    let owned;
    let mat = if mat.is_continuous() {
        mat
    } else {
        owned = mat.try_clone()?;
        &owned
    };

    let data = mat.data_bytes()?.to_vec();
    Frame::from_raw(mat.cols() as u32, mat.rows() as u32, data, ChannelOrder::Bgr)
        .ok_or(CameraError::UnexpectedFrameType(mat.typ()))
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        Ok(self.capture_frame()?)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("Failed to release camera: {}", e);
        }
    }
}
