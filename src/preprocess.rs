//! Image preprocessing for classifier inference.
//!
//! Turns an uploaded image into the NHWC float tensor the network was trained
//! on: fixed square resolution, RGB channels scaled to `[0, 1]`, batch of one.

use crate::error::ServiceError;
use image::imageops::FilterType;

/// Colour channels fed to the model
pub const CHANNELS: usize = 3;

/// Dense `f32` tensor with shape `[batch, height, width, channels]`
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl ImageTensor {
    /// Wrap raw data, checking that it fills the shape exactly
    pub fn new(shape: [usize; 4], data: Vec<f32>) -> Result<Self, ServiceError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(ServiceError::Inference(format!(
                "tensor data has {} values, shape {:?} needs {}",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    /// Shape as signed dimensions, as ONNX Runtime expects
    pub fn dims(&self) -> Vec<i64> {
        self.shape.iter().map(|&d| d as i64).collect()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value at `[0, y, x, c]`
    pub fn pixel(&self, y: usize, x: usize, c: usize) -> f32 {
        let [_, _, width, channels] = self.shape;
        self.data[(y * width + x) * channels + c]
    }
}

/// Decodes, resizes and normalizes uploaded images.
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    size: u32,
    filter: FilterType,
}

impl ImagePreprocessor {
    /// Create a preprocessor producing `size × size` inputs
    pub fn new(size: u32, filter: FilterType) -> Self {
        Self { size, filter }
    }

    /// Decode image bytes into a `[1, size, size, 3]` tensor.
    ///
    /// The image is stretched to the target square; aspect ratio is not kept.
    pub fn process(&self, bytes: &[u8]) -> Result<ImageTensor, ServiceError> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| ServiceError::Decode(e.to_string()))?;

        let resized = decoded.resize_exact(self.size, self.size, self.filter);
        let rgb = resized.to_rgb8();

        let data: Vec<f32> = rgb
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 255.0)
            .collect();

        ImageTensor::new(self.output_shape(), data)
    }

    /// Tensor shape produced by [`process`](Self::process)
    pub fn output_shape(&self) -> [usize; 4] {
        let side = self.size as usize;
        [1, side, side, CHANNELS]
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(224, FilterType::CatmullRom)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    pub(crate) fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    pub(crate) fn red_jpeg() -> Vec<u8> {
        let img = RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]));
        encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
    }

    #[test]
    fn test_red_jpeg_shape_and_range() {
        let tensor = ImagePreprocessor::default().process(&red_jpeg()).unwrap();

        assert_eq!(tensor.shape(), [1, 224, 224, 3]);
        assert_eq!(tensor.data().len(), 224 * 224 * 3);
        assert!(tensor.data().iter().all(|v| (0.0..=1.0).contains(v)));

        // JPEG is lossy, but the red channel must dominate
        let centre = (
            tensor.pixel(112, 112, 0),
            tensor.pixel(112, 112, 1),
            tensor.pixel(112, 112, 2),
        );
        assert!(centre.0 > 0.9, "red = {}", centre.0);
        assert!(centre.1 < 0.1 && centre.2 < 0.1);
    }

    #[test]
    fn test_non_square_png_is_stretched() {
        let img = RgbImage::from_fn(300, 40, |x, _| {
            if x < 150 {
                Rgb([0, 0, 255])
            } else {
                Rgb([0, 255, 0])
            }
        });
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let tensor = ImagePreprocessor::default().process(&bytes).unwrap();
        assert_eq!(tensor.shape(), [1, 224, 224, 3]);

        // Left half stays blue and right half green across the full height
        assert!(tensor.pixel(0, 10, 2) > 0.99);
        assert!(tensor.pixel(223, 10, 2) > 0.99);
        assert!(tensor.pixel(0, 213, 1) > 0.99);
        assert!(tensor.pixel(223, 213, 1) > 0.99);
        assert!(tensor.pixel(112, 10, 1) < 0.01);
    }

    #[test]
    fn test_alpha_channel_is_dropped() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 0]));
        let bytes = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let preprocessor = ImagePreprocessor::new(16, FilterType::Nearest);
        let tensor = preprocessor.process(&bytes).unwrap();
        assert_eq!(tensor.shape(), [1, 16, 16, 3]);
        assert_eq!(preprocessor.output_shape(), tensor.shape());
        assert!(tensor.data().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_grayscale_is_expanded_to_rgb() {
        let img = image::GrayImage::from_pixel(5, 5, image::Luma([51]));
        let bytes = encode(DynamicImage::ImageLuma8(img), ImageFormat::Png);

        let tensor = ImagePreprocessor::default().process(&bytes).unwrap();
        assert_eq!(tensor.shape()[3], 3);
        assert!(tensor.data().iter().all(|&v| (v - 0.2).abs() < 0.005));
    }

    #[test]
    fn test_undecodable_bytes_are_decode_errors() {
        let err = ImagePreprocessor::default()
            .process(b"definitely not an image")
            .unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn test_tensor_rejects_mismatched_data() {
        assert!(ImageTensor::new([1, 2, 2, 3], vec![0.0; 11]).is_err());
        let tensor = ImageTensor::new([1, 2, 2, 3], vec![0.0; 12]).unwrap();
        assert_eq!(tensor.dims(), vec![1, 2, 2, 3]);
    }
}
