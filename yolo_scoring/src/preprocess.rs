use crate::config::InputLayout;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array4;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("model input size must be greater than zero")]
    InvalidInputSize,
}

/// RGB, resized to `input_size` square, scaled to [0, 1], with a batch dimension of 1.
pub fn transform_image(
    image: &DynamicImage,
    input_size: u32,
    layout: InputLayout,
) -> Result<Array4<f32>, PreprocessError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessError::EmptyImage { width, height });
    }
    if input_size == 0 {
        return Err(PreprocessError::InvalidInputSize);
    }

    let resized = image
        .resize_exact(input_size, input_size, FilterType::Triangle)
        .to_rgb8();

    let size = input_size as usize;
    let mut input = match layout {
        InputLayout::Nhwc => Array4::zeros((1, size, size, 3)),
        InputLayout::Nchw => Array4::zeros((1, 3, size, size)),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for (channel, value) in pixel.0.iter().enumerate() {
            let value = *value as f32 / 255.;
            match layout {
                InputLayout::Nhwc => input[[0, y, x, channel]] = value,
                InputLayout::Nchw => input[[0, channel, y, x]] = value,
            }
        }
    }

    Ok(input)
}
