//! Image normalization for the siamese model.
//!
//! Every image, probe or reference, goes through the same steps exactly once:
//! decode, require colour, resize to the fixed model input and scale bytes
//! into [0, 1].

use crate::types::{ImageTensor, RawImage};
use image::imageops::{self, FilterType};
use image::DynamicImage;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::str::FromStr;
use thiserror::Error;

// --- Named constants ---
const INPUT_SIZE: u32 = 100;
const INPUT_CHANNELS: usize = 3;
const PIXEL_MAX: f32 = 255.0;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has {0} channel(s), colour input needs at least 3")]
    TooFewChannels(u8),
    #[error("image has zero width or height")]
    EmptyImage,
}

/// Rectangular window cut from a frame before it becomes a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("crop region must be `x,y,width,height`, got {0:?}")]
pub struct ParseCropRegionError(String);

impl FromStr for CropRegion {
    type Err = ParseCropRegionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ParseCropRegionError(s.to_string()))?;

        match parts[..] {
            [x, y, width, height] => Ok(Self::new(x, y, width, height)),
            _ => Err(ParseCropRegionError(s.to_string())),
        }
    }
}

/// Converts raw images into the model's fixed-size normalized tensor.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    width: u32,
    height: u32,
    filter: FilterType,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(INPUT_SIZE, INPUT_SIZE)
    }
}

impl Preprocessor {
    /// Preprocessor for a model taking `height × width × 3` input.
    ///
    /// Resizing is bilinear, which is deterministic for a given input.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            filter: FilterType::Triangle,
        }
    }

    /// `[height, width, channels]` of every tensor this preprocessor emits.
    pub fn input_shape(&self) -> [usize; 3] {
        [self.height as usize, self.width as usize, INPUT_CHANNELS]
    }

    /// Decode, resize and scale one image into [0, 1].
    pub fn preprocess(&self, image: &RawImage) -> Result<ImageTensor, PreprocessError> {
        let decoded = decode(image)?;

        let channels = decoded.color().channel_count();
        if channels < INPUT_CHANNELS as u8 {
            return Err(PreprocessError::TooFewChannels(channels));
        }
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(PreprocessError::EmptyImage);
        }

        let rgb = decoded.to_rgb8();
        let rgb = if rgb.dimensions() == (self.width, self.height) {
            rgb
        } else {
            imageops::resize(&rgb, self.width, self.height, self.filter)
        };

        let [h, w, c] = self.input_shape();
        let mut tensor = Array3::<f32>::zeros((h, w, c));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for (ch, &value) in pixel.0.iter().enumerate() {
                tensor[[y as usize, x as usize, ch]] = value as f32 / PIXEL_MAX;
            }
        }

        Ok(ImageTensor::new(tensor))
    }

    /// Cut `region` out of `image`.
    ///
    /// The region is clamped to the image bounds; a region entirely outside
    /// the image yields an empty image, which [`preprocess`](Self::preprocess)
    /// rejects.
    pub fn crop(&self, image: &RawImage, region: CropRegion) -> Result<RawImage, PreprocessError> {
        let decoded = decode(image)?;
        Ok(RawImage::Decoded(decoded.crop_imm(
            region.x,
            region.y,
            region.width,
            region.height,
        )))
    }
}

fn decode(image: &RawImage) -> Result<Cow<'_, DynamicImage>, PreprocessError> {
    match image {
        RawImage::Encoded(bytes) => Ok(Cow::Owned(image::load_from_memory(bytes)?)),
        RawImage::Decoded(img) => Ok(Cow::Borrowed(img)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, LumaA, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img.clone())
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_output_shape() {
        let raw = RawImage::from(DynamicImage::ImageRgb8(gradient(640, 480)));
        let tensor = Preprocessor::default().preprocess(&raw).unwrap();
        assert_eq!(tensor.shape(), &[100, 100, 3]);
    }

    #[test]
    fn test_output_range() {
        let raw = RawImage::from(DynamicImage::ImageRgb8(gradient(300, 250)));
        let tensor = Preprocessor::default().preprocess(&raw).unwrap();
        assert!(tensor.view().iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_scaling_divides_by_255() {
        let img = RgbImage::from_pixel(100, 100, Rgb([255, 0, 51]));
        let tensor = Preprocessor::default()
            .preprocess(&RawImage::from(DynamicImage::ImageRgb8(img)))
            .unwrap();
        let v = tensor.view();
        assert_eq!(v[[0, 0, 0]], 1.0);
        assert_eq!(v[[0, 0, 1]], 0.0);
        assert!((v[[99, 99, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_target_size_input_is_not_resampled() {
        let img = gradient(100, 100);
        let tensor = Preprocessor::default()
            .preprocess(&RawImage::from(DynamicImage::ImageRgb8(img.clone())))
            .unwrap();
        let v = tensor.view();
        for (x, y, pixel) in img.enumerate_pixels() {
            for ch in 0..3 {
                assert_eq!(v[[y as usize, x as usize, ch]], pixel[ch] as f32 / 255.0);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let raw = RawImage::from(DynamicImage::ImageRgb8(gradient(257, 131)));
        let pre = Preprocessor::default();
        assert_eq!(pre.preprocess(&raw).unwrap(), pre.preprocess(&raw).unwrap());
    }

    #[test]
    fn test_encoded_png_matches_decoded() {
        let img = gradient(120, 90);
        let pre = Preprocessor::default();
        let from_bytes = pre.preprocess(&RawImage::Encoded(encode_png(&img))).unwrap();
        let from_pixels = pre
            .preprocess(&RawImage::from(DynamicImage::ImageRgb8(img)))
            .unwrap();
        assert_eq!(from_bytes, from_pixels);
    }

    #[test]
    fn test_undecodable_bytes() {
        let result = Preprocessor::default().preprocess(&RawImage::Encoded(vec![0xde, 0xad, 0xbe, 0xef]));
        assert!(matches!(result, Err(PreprocessError::Decode(_))));
    }

    #[test]
    fn test_grayscale_rejected() {
        let img = GrayImage::from_pixel(100, 100, Luma([128]));
        let result = Preprocessor::default().preprocess(&RawImage::from(DynamicImage::ImageLuma8(img)));
        assert!(matches!(result, Err(PreprocessError::TooFewChannels(1))));
    }

    #[test]
    fn test_gray_alpha_rejected() {
        let img = image::GrayAlphaImage::from_pixel(10, 10, LumaA([128, 255]));
        let result =
            Preprocessor::default().preprocess(&RawImage::from(DynamicImage::ImageLumaA8(img)));
        assert!(matches!(result, Err(PreprocessError::TooFewChannels(2))));
    }

    #[test]
    fn test_rgba_drops_alpha() {
        let img = RgbaImage::from_pixel(100, 100, Rgba([0, 255, 0, 10]));
        let tensor = Preprocessor::default()
            .preprocess(&RawImage::from(DynamicImage::ImageRgba8(img)))
            .unwrap();
        assert_eq!(tensor.shape(), &[100, 100, 3]);
        assert_eq!(tensor.view()[[50, 50, 1]], 1.0);
    }

    #[test]
    fn test_empty_image_rejected() {
        let result = Preprocessor::default().preprocess(&RawImage::from(DynamicImage::new_rgb8(0, 0)));
        assert!(matches!(result, Err(PreprocessError::EmptyImage)));
    }

    #[test]
    fn test_crop_window() {
        let raw = RawImage::from(DynamicImage::ImageRgb8(gradient(640, 480)));
        let pre = Preprocessor::default();
        let cropped = pre.crop(&raw, CropRegion::new(200, 120, 250, 250)).unwrap();
        let RawImage::Decoded(img) = cropped else {
            panic!("crop should return decoded pixels");
        };
        assert_eq!((img.width(), img.height()), (250, 250));
        assert_eq!(img.to_rgb8().get_pixel(0, 0), &Rgb([200, 120, 64]));
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let raw = RawImage::from(DynamicImage::ImageRgb8(gradient(640, 480)));
        let cropped = Preprocessor::default()
            .crop(&raw, CropRegion::new(600, 400, 250, 250))
            .unwrap();
        let RawImage::Decoded(img) = cropped else {
            panic!("crop should return decoded pixels");
        };
        assert_eq!((img.width(), img.height()), (40, 80));
    }

    #[test]
    fn test_crop_outside_image_fails_preprocess() {
        let raw = RawImage::from(DynamicImage::ImageRgb8(gradient(64, 64)));
        let pre = Preprocessor::default();
        let cropped = pre.crop(&raw, CropRegion::new(100, 100, 10, 10)).unwrap();
        assert!(matches!(pre.preprocess(&cropped), Err(PreprocessError::EmptyImage)));
    }

    #[test]
    fn test_parse_crop_region() {
        assert_eq!("200,120,250,250".parse::<CropRegion>(), Ok(CropRegion::new(200, 120, 250, 250)));
        assert_eq!(" 1, 2 ,3,4".parse::<CropRegion>(), Ok(CropRegion::new(1, 2, 3, 4)));
        assert!("1,2,3".parse::<CropRegion>().is_err());
        assert!("a,b,c,d".parse::<CropRegion>().is_err());
    }
}
