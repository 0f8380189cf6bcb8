use std::path::Path;

use crate::{
    config::RunConfig,
    errors::{FaceRestoreError, Result},
    traits::{BackgroundUpsampler, EnhanceOptions, FaceRestorer, RestorationResult},
};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use log::info;
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

/// Side length of the square faces the restoration network works on.
pub const FACE_SIZE: u32 = 512;

/// Whether an accelerated execution provider can be used on this machine.
pub fn accelerator_available() -> bool {
    CUDAExecutionProvider::default()
        .is_available()
        .unwrap_or(false)
}

fn model_error(operation: &str, err: impl std::fmt::Display) -> FaceRestoreError {
    FaceRestoreError::Model {
        operation: operation.to_string(),
        source: err.to_string().into(),
    }
}

/// A single-input, single-output ONNX Runtime session.
pub struct OnnxSession {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxSession {
    pub fn load(model_path: &Path, device_id: i32) -> Result<Self> {
        let session = SessionBuilder::new()
            .map_err(|e| model_error("session builder init", e))?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| model_error("execution provider setup", e))?
            .with_memory_pattern(true)
            .map_err(|e| model_error("memory pattern setup", e))?
            .commit_from_file(model_path)
            .map_err(|e| model_error(&format!("load model file: {}", model_path.display()), e))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| FaceRestoreError::Validation {
                field: "model".to_string(),
                reason: "has no inputs".to_string(),
            })?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| FaceRestoreError::Validation {
                field: "model".to_string(),
                reason: "has no outputs".to_string(),
            })?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }

    pub fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        let array = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        Ok(array)
    }
}

/// RGB image to a `1x3xHxW` tensor; `normalize` receives values in `[0, 1]`.
pub(crate) fn image_to_tensor(image: &RgbImage, normalize: impl Fn(f32) -> f32) -> Array4<f32> {
    image
        .as_ndarray3()
        .mapv(|v| normalize(f32::from(v) / 255.0))
        .insert_axis(Axis(0))
}

/// `1x3xHxW` tensor to an RGB image; `denormalize` must map into `[0, 1]`.
pub(crate) fn tensor_to_image(
    tensor: ArrayView4<f32>,
    denormalize: impl Fn(f32) -> f32,
) -> Result<RgbImage> {
    let shape = tensor.shape();
    if shape[0] != 1 || shape[1] != 3 {
        return Err(FaceRestoreError::Validation {
            field: "model output".to_string(),
            reason: format!("expected shape [1, 3, H, W], got {:?}", shape),
        });
    }

    let (height, width) = (shape[2] as u32, shape[3] as u32);
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let channel = |c: usize| {
            let v = denormalize(tensor[[0, c, y as usize, x as usize]]);
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        };
        Rgb([channel(0), channel(1), channel(2)])
    }))
}

/// Side length below which a region is too small to hold a face.
pub const MIN_FACE_SIZE: u32 = 16;

/// Square region of the input treated as a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub side: u32,
}

impl FaceRegion {
    /// The largest square centred in a `width x height` image.
    pub fn centered(width: u32, height: u32) -> Self {
        let side = width.min(height);
        Self {
            x: (width - side) / 2,
            y: (height - side) / 2,
            side,
        }
    }
}

/// Face regions of a `width x height` image.
///
/// Non-overlapping squares of the short side are laid along the long axis,
/// the leftover margin split evenly on both ends. With `only_center_face`
/// only the centred square is kept. Images whose short side is below
/// [`MIN_FACE_SIZE`] have no face.
pub fn face_regions(width: u32, height: u32, only_center_face: bool) -> Vec<FaceRegion> {
    let side = width.min(height);
    if side < MIN_FACE_SIZE {
        return Vec::new();
    }
    if only_center_face {
        return vec![FaceRegion::centered(width, height)];
    }

    let long = width.max(height);
    let count = long / side;
    let margin = (long - count * side) / 2;
    (0..count)
        .map(|i| {
            let offset = margin + i * side;
            if width >= height {
                FaceRegion { x: offset, y: 0, side }
            } else {
                FaceRegion { x: 0, y: offset, side }
            }
        })
        .collect()
}

fn scaled(value: u32, upscale: u32) -> Result<u32> {
    value
        .checked_mul(upscale)
        .ok_or_else(|| FaceRestoreError::Validation {
            field: "upscale".to_string(),
            reason: format!("{value} x {upscale} exceeds the maximum image size"),
        })
}

/// Upscale `image` and overlay each restored face on its region.
pub fn paste_back(
    image: &RgbImage,
    faces: &[(FaceRegion, &RgbImage)],
    upscale: u32,
    bg_upsampler: Option<&dyn BackgroundUpsampler>,
) -> Result<RgbImage> {
    let (width, height) = (scaled(image.width(), upscale)?, scaled(image.height(), upscale)?);
    let mut canvas = match bg_upsampler {
        Some(upsampler) => {
            let background = upsampler.upsample(image)?;
            if background.dimensions() == (width, height) {
                background
            } else {
                imageops::resize(&background, width, height, FilterType::Lanczos3)
            }
        }
        None => imageops::resize(image, width, height, FilterType::Lanczos3),
    };

    for (region, restored_face) in faces {
        let side = scaled(region.side, upscale)?;
        let face = imageops::resize(*restored_face, side, side, FilterType::Lanczos3);
        imageops::replace(
            &mut canvas,
            &face,
            i64::from(scaled(region.x, upscale)?),
            i64::from(scaled(region.y, upscale)?),
        );
    }
    Ok(canvas)
}

/// GFPGAN face restorer backed by ONNX Runtime.
pub struct GfpganRestorer {
    session: OnnxSession,
    upscale: u32,
    bg_upsampler: Option<Box<dyn BackgroundUpsampler>>,
}

impl GfpganRestorer {
    pub fn new(
        config: &RunConfig,
        bg_upsampler: Option<Box<dyn BackgroundUpsampler>>,
    ) -> Result<Self> {
        info!(
            "loading {:?} restorer (channel multiplier {}) from {}",
            config.arch,
            config.channel,
            config.model_path.display()
        );
        let session = OnnxSession::load(&config.model_path, config.device_id)?;

        // initialize model
        let data = Array4::<f32>::zeros((1, 3, FACE_SIZE as usize, FACE_SIZE as usize));
        session.predict(data.view())?;

        Ok(Self {
            session,
            upscale: config.upscale,
            bg_upsampler,
        })
    }

    fn restore_face(&self, face: &RgbImage) -> Result<RgbImage> {
        let tensor = image_to_tensor(face, |v| (v - 0.5) / 0.5);
        let output = self.session.predict(tensor.view())?;
        tensor_to_image(output.view(), |v| (v + 1.0) / 2.0)
    }
}

impl FaceRestorer for GfpganRestorer {
    fn enhance(&self, image: &RgbImage, options: EnhanceOptions) -> Result<RestorationResult> {
        if options.aligned {
            let face = imageops::resize(image, FACE_SIZE, FACE_SIZE, FilterType::Lanczos3);
            let restored = self.restore_face(&face)?;
            return Ok(RestorationResult {
                cropped_faces: vec![face],
                restored_faces: vec![restored],
                restored_image: None,
            });
        }

        let regions = face_regions(image.width(), image.height(), options.only_center_face);
        if regions.is_empty() {
            return Ok(RestorationResult::default());
        }

        let mut cropped_faces = Vec::with_capacity(regions.len());
        let mut restored_faces = Vec::with_capacity(regions.len());
        for region in &regions {
            let crop =
                imageops::crop_imm(image, region.x, region.y, region.side, region.side).to_image();
            let face = imageops::resize(&crop, FACE_SIZE, FACE_SIZE, FilterType::Lanczos3);
            restored_faces.push(self.restore_face(&face)?);
            cropped_faces.push(face);
        }

        let restored_image = if options.paste_back {
            let placed: Vec<_> = regions.iter().copied().zip(&restored_faces).collect();
            Some(paste_back(
                image,
                &placed,
                self.upscale,
                self.bg_upsampler.as_deref(),
            )?)
        } else {
            None
        };

        Ok(RestorationResult {
            cropped_faces,
            restored_faces,
            restored_image,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::StubUpsampler;

    #[test]
    fn test_face_region_centered() {
        assert_eq!(
            FaceRegion::centered(300, 200),
            FaceRegion { x: 50, y: 0, side: 200 }
        );
        assert_eq!(
            FaceRegion::centered(100, 101),
            FaceRegion { x: 0, y: 0, side: 100 }
        );
        assert_eq!(FaceRegion::centered(0, 10).side, 0);
    }

    #[test]
    fn test_tensor_layout() -> Result<()> {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(2, 1, Rgb([255, 0, 51]));

        let tensor = image_to_tensor(&image, |v| (v - 0.5) / 0.5);
        assert_eq!(tensor.shape(), &[1, 3, 2, 3]);
        assert_eq!(tensor[[0, 0, 1, 2]], 1.0);
        assert_eq!(tensor[[0, 1, 1, 2]], -1.0);
        assert_eq!(tensor[[0, 0, 0, 0]], -1.0);

        let back = tensor_to_image(tensor.view(), |v| (v + 1.0) / 2.0)?;
        assert_eq!(back.get_pixel(2, 1), &Rgb([255, 0, 51]));
        Ok(())
    }

    #[test]
    fn test_tensor_to_image_clamps() -> Result<()> {
        let mut tensor = Array4::<f32>::zeros((1, 3, 1, 1));
        tensor[[0, 0, 0, 0]] = 2.0;
        tensor[[0, 1, 0, 0]] = -3.0;

        let image = tensor_to_image(tensor.view(), |v| v)?;
        assert_eq!(image.get_pixel(0, 0), &Rgb([255, 0, 0]));
        Ok(())
    }

    #[test]
    fn test_tensor_to_image_rejects_bad_shape() {
        let tensor = Array4::<f32>::zeros((1, 1, 4, 4));
        assert!(matches!(
            tensor_to_image(tensor.view(), |v| v),
            Err(FaceRestoreError::Validation { .. })
        ));
    }

    #[test]
    fn test_face_regions_along_long_axis() {
        assert_eq!(
            face_regions(300, 100, false),
            vec![
                FaceRegion { x: 0, y: 0, side: 100 },
                FaceRegion { x: 100, y: 0, side: 100 },
                FaceRegion { x: 200, y: 0, side: 100 },
            ]
        );
        // margin 50 split on both ends
        assert_eq!(
            face_regions(100, 250, false),
            vec![
                FaceRegion { x: 0, y: 25, side: 100 },
                FaceRegion { x: 0, y: 125, side: 100 },
            ]
        );
        assert_eq!(face_regions(64, 64, false), vec![FaceRegion::centered(64, 64)]);
    }

    #[test]
    fn test_face_regions_only_center_face() {
        assert_eq!(
            face_regions(250, 100, true),
            vec![FaceRegion { x: 75, y: 0, side: 100 }]
        );
    }

    #[test]
    fn test_face_regions_too_small() {
        assert!(face_regions(MIN_FACE_SIZE - 1, 200, false).is_empty());
        assert!(face_regions(200, MIN_FACE_SIZE - 1, true).is_empty());
        assert!(face_regions(0, 0, false).is_empty());
        assert_eq!(face_regions(MIN_FACE_SIZE, MIN_FACE_SIZE, false).len(), 1);
    }

    #[test]
    fn test_paste_back_with_upsampler() -> Result<()> {
        let image = RgbImage::from_pixel(6, 4, Rgb([0, 0, 0]));
        let face = RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]));
        let region = FaceRegion::centered(6, 4);
        let upsampler = StubUpsampler { scale: 2 };

        let full = paste_back(
            &image,
            &[(region, &face)],
            2,
            Some(&upsampler as &dyn BackgroundUpsampler),
        )?;
        assert_eq!(full.dimensions(), (12, 8));
        // background left of the face region
        assert_eq!(full.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(full.get_pixel(11, 7), &Rgb([0, 0, 0]));
        // face region starts at x = 1 * 2
        assert!(full.get_pixel(2, 0).0.iter().all(|&c| c >= 250));
        assert!(full.get_pixel(9, 7).0.iter().all(|&c| c >= 250));
        Ok(())
    }

    #[test]
    fn test_paste_back_every_face() -> Result<()> {
        let image = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        let left = RgbImage::from_pixel(2, 2, Rgb([200, 0, 0]));
        let right = RgbImage::from_pixel(2, 2, Rgb([0, 0, 200]));
        let faces = [
            (FaceRegion { x: 0, y: 0, side: 2 }, &left),
            (FaceRegion { x: 2, y: 0, side: 2 }, &right),
        ];

        let full = paste_back(&image, &faces, 1, None)?;
        let [r, _, b] = full.get_pixel(0, 0).0;
        assert!(r > 150 && b < 50);
        let [r, _, b] = full.get_pixel(3, 1).0;
        assert!(b > 150 && r < 50);
        Ok(())
    }

    #[test]
    fn test_paste_back_rejects_overflowing_upscale() {
        let image = RgbImage::new(2, 2);
        let face = RgbImage::new(2, 2);

        let result = paste_back(&image, &[(FaceRegion::centered(2, 2), &face)], u32::MAX, None);
        assert!(matches!(
            result,
            Err(FaceRestoreError::Validation { ref field, .. }) if field == "upscale"
        ));
    }

    #[test]
    fn test_paste_back_resizes_mismatched_background() -> Result<()> {
        let image = RgbImage::from_pixel(4, 4, Rgb([10, 10, 10]));
        let face = RgbImage::from_pixel(8, 8, Rgb([200, 200, 200]));
        let upsampler = StubUpsampler { scale: 4 };

        let full = paste_back(
            &image,
            &[(FaceRegion::centered(4, 4), &face)],
            2,
            Some(&upsampler as &dyn BackgroundUpsampler),
        )?;
        assert_eq!(full.dimensions(), (8, 8));
        Ok(())
    }
}
