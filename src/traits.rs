use crate::errors::Result;
use image::RgbImage;

/// 復元エンジンへ渡すフラグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnhanceOptions {
    /// Input is already a 512x512 aligned face; detection is skipped.
    pub aligned: bool,
    /// Only the most central face is restored.
    pub only_center_face: bool,
    /// Restored faces are pasted back into a full-resolution image.
    pub paste_back: bool,
}

/// 一枚の画像に対する復元結果
///
/// `cropped_faces` と `restored_faces` はインデックスで対応する。
#[derive(Debug, Clone, Default)]
pub struct RestorationResult {
    pub cropped_faces: Vec<RgbImage>,
    pub restored_faces: Vec<RgbImage>,
    /// Absent when no face was found or paste-back is disabled.
    pub restored_image: Option<RgbImage>,
}

impl RestorationResult {
    /// Number of (cropped, restored) pairs that can be routed.
    pub fn face_count(&self) -> usize {
        self.cropped_faces.len().min(self.restored_faces.len())
    }

    pub fn face_pairs(&self) -> impl Iterator<Item = (&RgbImage, &RgbImage)> {
        self.cropped_faces.iter().zip(self.restored_faces.iter())
    }
}

/// 顔復元モデルの抽象化
///
/// バッチドライバは具象モデルではなくこのトレイトに依存するため、
/// テストではスタブ実装を差し込める。
pub trait FaceRestorer: Send + Sync {
    /// 顔を検出・復元し、切り出し顔・復元顔・（任意で）全体画像を返す
    fn enhance(&self, image: &RgbImage, options: EnhanceOptions) -> Result<RestorationResult>;
}

/// 背景アップサンプラーの抽象化
pub trait BackgroundUpsampler: Send + Sync {
    /// 画像を拡大して返す
    fn upsample(&self, image: &RgbImage) -> Result<RgbImage>;
}

impl<T: FaceRestorer + ?Sized> FaceRestorer for Box<T> {
    fn enhance(&self, image: &RgbImage, options: EnhanceOptions) -> Result<RestorationResult> {
        (**self).enhance(image, options)
    }
}

impl<T: BackgroundUpsampler + ?Sized> BackgroundUpsampler for Box<T> {
    fn upsample(&self, image: &RgbImage) -> Result<RgbImage> {
        (**self).upsample(image)
    }
}

impl<T: FaceRestorer + ?Sized> FaceRestorer for &T {
    fn enhance(&self, image: &RgbImage, options: EnhanceOptions) -> Result<RestorationResult> {
        (**self).enhance(image, options)
    }
}
