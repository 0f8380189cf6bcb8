use crate::errors::Result;
use crate::traits::{BackgroundUpsampler, EnhanceOptions, FaceRestorer, RestorationResult};
use image::{Rgb, RgbImage};
use parking_lot::Mutex;

/// テスト用のスタブ復元モデル
///
/// 顔は固定色の正方形、全体画像は入力の色反転を返す。
#[derive(Debug, Default)]
pub struct StubRestorer {
    pub face_count: usize,
    pub face_size: u32,
    /// Height of restored faces; differs from `face_size` to provoke a mismatch.
    pub restored_height: Option<u32>,
    seen: Mutex<Vec<((u32, u32), EnhanceOptions)>>,
}

impl StubRestorer {
    pub fn new(face_count: usize) -> Self {
        Self {
            face_count,
            face_size: 8,
            restored_height: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_restored_height(mut self, height: u32) -> Self {
        self.restored_height = Some(height);
        self
    }

    /// 呼び出し回数
    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    /// Dimensions of every image passed to `enhance`, in call order.
    pub fn seen(&self) -> Vec<(u32, u32)> {
        self.seen.lock().iter().map(|(dims, _)| *dims).collect()
    }

    /// Options received by `enhance`, in call order.
    pub fn options(&self) -> Vec<EnhanceOptions> {
        self.seen.lock().iter().map(|(_, options)| *options).collect()
    }
}

impl FaceRestorer for StubRestorer {
    fn enhance(&self, image: &RgbImage, options: EnhanceOptions) -> Result<RestorationResult> {
        self.seen.lock().push((image.dimensions(), options));

        let size = self.face_size;
        let restored_height = self.restored_height.unwrap_or(size);
        let cropped_faces = (0..self.face_count)
            .map(|_| RgbImage::from_pixel(size, size, Rgb([128, 128, 128])))
            .collect();
        let restored_faces = (0..self.face_count)
            .map(|_| RgbImage::from_pixel(size, restored_height, Rgb([255, 255, 255])))
            .collect();

        let restored_image = (options.paste_back && !options.aligned && self.face_count > 0)
            .then(|| {
                let mut full = image.clone();
                image::imageops::invert(&mut full);
                full
            });

        Ok(RestorationResult {
            cropped_faces,
            restored_faces,
            restored_image,
        })
    }
}

/// テスト用のスタブ背景アップサンプラー（最近傍の整数倍拡大）
#[derive(Debug, Clone, Copy)]
pub struct StubUpsampler {
    pub scale: u32,
}

impl BackgroundUpsampler for StubUpsampler {
    fn upsample(&self, image: &RgbImage) -> Result<RgbImage> {
        Ok(replicate(image, self.scale))
    }
}

/// Integer nearest-neighbour enlargement.
pub fn replicate(image: &RgbImage, scale: u32) -> RgbImage {
    RgbImage::from_fn(image.width() * scale, image.height() * scale, |x, y| {
        *image.get_pixel(x / scale, y / scale)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_restorer_faces() -> Result<()> {
        let stub = StubRestorer::new(2);
        let image = RgbImage::from_pixel(20, 10, Rgb([10, 20, 30]));

        let result = stub.enhance(
            &image,
            EnhanceOptions {
                paste_back: true,
                ..Default::default()
            },
        )?;
        assert_eq!(result.face_count(), 2);
        let full = result.restored_image.unwrap();
        assert_eq!(full.get_pixel(0, 0), &Rgb([245, 235, 225]));
        assert_eq!(stub.seen(), vec![(20, 10)]);
        Ok(())
    }

    #[test]
    fn test_stub_restorer_without_paste_back() -> Result<()> {
        let stub = StubRestorer::new(1);
        let result = stub.enhance(&RgbImage::new(4, 4), EnhanceOptions::default())?;
        assert!(result.restored_image.is_none());
        assert_eq!(stub.calls(), 1);
        Ok(())
    }

    #[test]
    fn test_stub_restorer_records_options() -> Result<()> {
        let stub = StubRestorer::new(1);
        let aligned = EnhanceOptions {
            aligned: true,
            ..Default::default()
        };
        stub.enhance(&RgbImage::new(4, 4), aligned)?;
        stub.enhance(&RgbImage::new(2, 2), EnhanceOptions::default())?;

        assert_eq!(stub.options(), vec![aligned, EnhanceOptions::default()]);
        assert_eq!(stub.seen(), vec![(4, 4), (2, 2)]);
        Ok(())
    }

    #[test]
    fn test_stub_upsampler() -> Result<()> {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(1, 0, Rgb([9, 9, 9]));

        let up = StubUpsampler { scale: 3 }.upsample(&image)?;
        assert_eq!(up.dimensions(), (6, 3));
        assert_eq!(up.get_pixel(2, 2), &Rgb([0, 0, 0]));
        assert_eq!(up.get_pixel(3, 0), &Rgb([9, 9, 9]));
        Ok(())
    }
}
