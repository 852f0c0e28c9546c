use image::imageops::{self, FilterType};
use ndarray::Array4;

/// Side length the classifier was trained on.
pub const INPUT_SIZE: u32 = 299;
pub const CHANNELS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Normalized NHWC input batch of a single image.
#[derive(Debug, Clone)]
pub struct ImageTensor(Array4<f32>);

impl ImageTensor {
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn view(&self) -> ndarray::ArrayView4<'_, f32> {
        self.0.view()
    }

    /// Values in row-major NHWC order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.0.iter().copied().collect()
    }
}

/// Decodes `bytes`, forces 8-bit RGB, stretches to 299x299 and scales
/// channels into `[0, 1]`.
pub fn preprocess(bytes: &[u8]) -> Result<ImageTensor, PreprocessError> {
    let decoded = image::load_from_memory(bytes)?;
    let rgb = decoded.to_rgb8();
    let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let side = INPUT_SIZE as usize;
    let tensor = Array4::from_shape_fn((1, side, side, CHANNELS), |(_, y, x, c)| {
        f32::from(resized.get_pixel(x as u32, y as u32)[c]) / 255.0
    });

    Ok(ImageTensor(tensor))
}
