use anyhow::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Horizontal crop region as fractions of the frame width; full height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WidthCrop {
    pub start: f32,
    pub end: f32,
}

impl WidthCrop {
    pub fn new(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    pub fn is_full(&self) -> bool {
        self.start <= 0.0 && self.end >= 1.0
    }
}

/// Crops an image to a normalized width range.
pub fn crop_width(img: &RgbImage, crop: WidthCrop) -> Result<RgbImage> {
    let width = img.width();
    let height = img.height();

    // Truncate both bounds toward the left edge
    let x0 = (f64::from(crop.start) * f64::from(width)).floor() as i64;
    let x1 = (f64::from(crop.end) * f64::from(width)).floor() as i64;

    let x_clamped = x0.clamp(0, width as i64) as u32;
    let w_clamped = (x1 - x_clamped as i64).clamp(0, (width - x_clamped) as i64) as u32;

    if w_clamped == 0 || height == 0 {
        anyhow::bail!(
            "Invalid crop dimensions: {}x{} (crop: {:?}, frame {}x{})",
            w_clamped,
            height,
            crop,
            width,
            height
        );
    }

    Ok(imageops::crop_imm(img, x_clamped, 0, w_clamped, height).to_image())
}

/// Crop then resize to the model input size (bilinear).
pub fn preprocess_frame(img: &RgbImage, crop: WidthCrop, size: (u32, u32)) -> Result<RgbImage> {
    let cropped = if crop.is_full() {
        img.clone()
    } else {
        crop_width(img, crop)?
    };

    if cropped.dimensions() == size {
        return Ok(cropped);
    }
    Ok(imageops::resize(&cropped, size.0, size.1, FilterType::Triangle))
}
