use super::ClassifierError;
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Preprocessor for converting RGB frames to pose model input tensors
///
/// Produces `[1, height, width, 3]` (NHWC), the layout BlazePose expects.
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Preprocess an RGB image into a normalized tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Lay out as NHWC
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>, ClassifierError> {
        let _span = tracing::debug_span!("preprocess").entered();

        if image.width() == 0 || image.height() == 0 {
            return Err(ClassifierError::Inference("empty frame".to_string()));
        }

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image.clone()
        };

        let (width, height) = resized.dimensions();
        let (h, w) = (height as usize, width as usize);
        let mut tensor = Array4::<f32>::zeros((1, h, w, 3));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                tensor[[0, y, x, c]] = pixel[c] as f32 / 255.0;
            }
        }

        Ok(tensor)
    }
}
