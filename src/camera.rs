//! Camera acquisition with a fixed backend fallback order.

use opencv::prelude::*;
use opencv::videoio;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Capture device index. Only a single camera is supported.
pub const DEVICE_INDEX: i32 = 0;

pub const FRAME_WIDTH: f64 = 640.0;
pub const FRAME_HEIGHT: f64 = 480.0;
pub const FRAME_RATE: f64 = 30.0;

/// Capture APIs tried in order: the Windows backends first, then
/// auto-detection, then Video4Linux2.
const BACKEND_PREFERENCE: [i32; 4] = [
    videoio::CAP_DSHOW,
    videoio::CAP_MSMF,
    videoio::CAP_ANY,
    videoio::CAP_V4L2,
];

/// Why one backend probe failed.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("backend failed to open: {0}")]
    Open(#[from] opencv::Error),
    #[error("device did not report itself open")]
    NotOpened,
}

#[derive(Error, Debug)]
#[error("no capture backend could open camera {index}")]
pub struct AcquireError {
    pub index: i32,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame read failed: {0}")]
    Read(#[from] opencv::Error),
    #[error("camera returned an empty frame")]
    EmptyFrame,
}

/// An open, configured capture device.
pub struct CameraSource {
    capture: videoio::VideoCapture,
}

impl CameraSource {
    pub fn read_frame(&mut self) -> Result<Mat, CaptureError> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? {
            return Err(CaptureError::EmptyFrame);
        }
        if frame.size()?.width == 0 {
            return Err(CaptureError::EmptyFrame);
        }
        Ok(frame)
    }

    /// Release the device handle. Dropping the source releases it as well.
    pub fn release(&mut self) -> opencv::Result<()> {
        self.capture.release()
    }
}

/// Open the camera, trying each preferred backend and finally the default
/// one. Also used mid-session to recover from a failed read.
pub fn acquire() -> Result<CameraSource, AcquireError> {
    if let Ok(source) = acquire_with_backends(DEVICE_INDEX, &BACKEND_PREFERENCE) {
        return Ok(source);
    }
    debug!("all preferred backends failed, trying the default backend");
    match probe_default(DEVICE_INDEX) {
        Ok(capture) => {
            info!("opened camera {DEVICE_INDEX} with the default backend");
            Ok(CameraSource { capture })
        }
        Err(err) => {
            warn!("default backend failed: {err}");
            Err(AcquireError {
                index: DEVICE_INDEX,
            })
        }
    }
}

/// Probe each backend in order; the first that opens wins. An empty list
/// always fails.
pub fn acquire_with_backends(index: i32, backends: &[i32]) -> Result<CameraSource, AcquireError> {
    for &backend in backends {
        match probe(index, backend) {
            Ok(capture) => {
                info!("opened camera {index} with backend {backend}");
                return Ok(CameraSource { capture });
            }
            Err(err) => debug!("backend {backend} unavailable: {err}"),
        }
    }
    Err(AcquireError { index })
}

fn probe(index: i32, backend: i32) -> Result<videoio::VideoCapture, ProbeError> {
    let mut capture = videoio::VideoCapture::new(index, backend)?;
    check_and_configure(&mut capture)?;
    Ok(capture)
}

fn probe_default(index: i32) -> Result<videoio::VideoCapture, ProbeError> {
    let mut capture = videoio::VideoCapture::new_def(index)?;
    check_and_configure(&mut capture)?;
    Ok(capture)
}

fn check_and_configure(capture: &mut videoio::VideoCapture) -> Result<(), ProbeError> {
    if !capture.is_opened()? {
        let _ = capture.release();
        return Err(ProbeError::NotOpened);
    }
    capture.set(videoio::CAP_PROP_FRAME_WIDTH, FRAME_WIDTH)?;
    capture.set(videoio::CAP_PROP_FRAME_HEIGHT, FRAME_HEIGHT)?;
    capture.set(videoio::CAP_PROP_FPS, FRAME_RATE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_backend_list_never_succeeds() {
        assert!(acquire_with_backends(DEVICE_INDEX, &[]).is_err());
    }

    #[test]
    fn acquire_error_names_the_device() {
        let err = acquire_with_backends(3, &[]).unwrap_err();
        assert_eq!(err.index, 3);
        assert!(err.to_string().contains("camera 3"));
    }
}
