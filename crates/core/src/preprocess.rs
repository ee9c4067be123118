use crate::error::PipelineError;
use image::imageops::FilterType;
use image::DynamicImage;
use providers::ImageTensor;
use std::path::Path;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decodes an image file and prepares it for an extractor expecting `size`.
pub fn load_tensor(path: &Path, size: (u32, u32)) -> Result<ImageTensor, PipelineError> {
    if !path.is_file() {
        return Err(PipelineError::MissingImage(path.to_path_buf()));
    }
    let img = image::open(path).map_err(|e| PipelineError::EmbeddingExtraction {
        frame: path.display().to_string(),
        reason: format!("decode failed: {e}"),
    })?;
    to_tensor(&img, size).map_err(|e| PipelineError::EmbeddingExtraction {
        frame: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Resize to `size`, scale to [0, 1] and normalize each channel, CHW layout.
pub fn to_tensor(
    img: &DynamicImage,
    (width, height): (u32, u32),
) -> Result<ImageTensor, providers::ProviderError> {
    let rgb = img.resize_exact(width, height, FilterType::Triangle).to_rgb8();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; ImageTensor::CHANNELS * plane];
    for (i, px) in rgb.as_raw().chunks_exact(3).enumerate() {
        for c in 0..ImageTensor::CHANNELS {
            let v = px[c] as f32 / 255.0;
            data[c * plane + i] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    ImageTensor::new(width, height, data)
}
