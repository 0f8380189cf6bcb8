use image::{imageops, GenericImage, RgbImage};
use log::info;

use crate::config::UpsamplerSettings;
use crate::errors::{FaceRestoreError, Result};
use crate::model::{image_to_tensor, tensor_to_image, OnnxSession};
use crate::traits::BackgroundUpsampler;

/// Real-ESRGAN background upsampler backed by ONNX Runtime.
pub struct RealEsrganUpsampler {
    session: OnnxSession,
    tile: u32,
    tile_pad: u32,
}

impl RealEsrganUpsampler {
    pub fn new(settings: &UpsamplerSettings, device_id: i32) -> Result<Self> {
        info!(
            "loading background upsampler from {} (tile {}, pad {})",
            settings.model_path.display(),
            settings.tile,
            settings.tile_pad
        );
        Ok(Self {
            session: OnnxSession::load(&settings.model_path, device_id)?,
            tile: settings.tile,
            tile_pad: settings.tile_pad,
        })
    }

    fn infer(&self, image: &RgbImage) -> Result<RgbImage> {
        let tensor = image_to_tensor(image, |v| v);
        let output = self.session.predict(tensor.view())?;
        tensor_to_image(output.view(), |v| v)
    }
}

impl BackgroundUpsampler for RealEsrganUpsampler {
    fn upsample(&self, image: &RgbImage) -> Result<RgbImage> {
        upsample_tiled(image, self.tile, self.tile_pad, |tile| self.infer(tile))
    }
}

/// Run `infer` over `tile`-sized pieces of `image` and stitch the results.
///
/// Each piece is fed with up to `pad` pixels of surrounding context, which is
/// cropped away again after inference. A `tile` of 0 processes the whole image
/// at once. The scale factor is taken from the first inference and every
/// later piece must match it.
pub fn upsample_tiled(
    image: &RgbImage,
    tile: u32,
    pad: u32,
    mut infer: impl FnMut(&RgbImage) -> Result<RgbImage>,
) -> Result<RgbImage> {
    if tile == 0 {
        return infer(image);
    }

    let (width, height) = image.dimensions();
    let mut stitched: Option<(RgbImage, u32)> = None;

    for ty in (0..height).step_by(tile as usize) {
        for tx in (0..width).step_by(tile as usize) {
            let tw = tile.min(width - tx);
            let th = tile.min(height - ty);
            let x0 = tx.saturating_sub(pad);
            let y0 = ty.saturating_sub(pad);
            let x1 = (tx + tw + pad).min(width);
            let y1 = (ty + th + pad).min(height);

            let input = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
            let output = infer(&input)?;
            let scale = output.width() / input.width();
            if scale == 0 || output.dimensions() != (input.width() * scale, input.height() * scale)
            {
                return Err(FaceRestoreError::Validation {
                    field: "upsampler output".to_string(),
                    reason: format!(
                        "{}x{} is not an integer multiple of the {}x{} tile",
                        output.width(),
                        output.height(),
                        input.width(),
                        input.height()
                    ),
                });
            }

            let (canvas, expected) = stitched
                .get_or_insert_with(|| (RgbImage::new(width * scale, height * scale), scale));
            if *expected != scale {
                return Err(FaceRestoreError::Validation {
                    field: "upsampler output".to_string(),
                    reason: format!("scale changed from {} to {} between tiles", expected, scale),
                });
            }

            let inner = imageops::crop_imm(
                &output,
                (tx - x0) * scale,
                (ty - y0) * scale,
                tw * scale,
                th * scale,
            )
            .to_image();
            canvas.copy_from(&inner, tx * scale, ty * scale)?;
        }
    }

    Ok(stitched.map_or_else(|| RgbImage::new(0, 0), |(canvas, _)| canvas))
}
