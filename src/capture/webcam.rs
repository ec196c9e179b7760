use super::{CaptureError, CaptureSource};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

/// Frame rate asked of the device. The pipeline throttles below this.
const REQUESTED_FRAME_RATE: u32 = 30;

/// USB webcam backed by nokhwa.
///
/// The device handle is only created on [`CaptureSource::open`], so a
/// `WebcamCapture` can be built on one thread and opened on the worker.
/// The closest format the device offers to the requested size is used, and
/// `resolution` reports what was actually negotiated.
pub struct WebcamCapture {
    device_index: u32,
    width: u32,
    height: u32,
    camera: Option<Camera>,
}

impl WebcamCapture {
    pub fn new(device_index: u32, width: u32, height: u32) -> Self {
        Self {
            device_index,
            width,
            height,
            camera: None,
        }
    }
}

impl CaptureSource for WebcamCapture {
    fn open(&mut self) -> Result<(), CaptureError> {
        tracing::info!(
            "Opening webcam {} at {}x{}",
            self.device_index,
            self.width,
            self.height
        );

        let index = CameraIndex::Index(self.device_index);
        let format = CameraFormat::new(
            Resolution::new(self.width, self.height),
            FrameFormat::MJPEG,
            REQUESTED_FRAME_RATE,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let mut camera =
            Camera::new(index, requested).map_err(|e| CaptureError::Open(e.to_string()))?;

        camera
            .open_stream()
            .map_err(|e| CaptureError::Open(format!("failed to open camera stream: {e}")))?;

        let actual = camera.resolution();
        if (actual.width(), actual.height()) != (self.width, self.height) {
            tracing::warn!(
                "Webcam does not support {}x{}, using {}x{}",
                self.width,
                self.height,
                actual.width(),
                actual.height()
            );
        }
        self.width = actual.width();
        self.height = actual.height();

        tracing::info!("Webcam opened");
        self.camera = Some(camera);
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| CaptureError::Read("camera is not open".to_string()))?;

        let frame = camera
            .frame()
            .map_err(|e| CaptureError::Read(e.to_string()))?;

        frame
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::Read(format!("failed to decode frame: {e}")))
    }

    fn close(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                tracing::debug!("Error while stopping camera stream: {}", e);
            }
            tracing::info!("Webcam released");
        }
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        self.close();
    }
}
