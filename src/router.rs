//! Output routing: maps one processed image to the files it produces.
//!
//! Path derivation is pure ([`OutputSet::derive`]); [`route`] is the only
//! function here that touches the filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use image::{GenericImage, RgbImage};

use crate::batch::ImageEntry;
use crate::config::{ExtensionPolicy, RunConfig};
use crate::errors::{FaceRestoreError, Result};
use crate::traits::RestorationResult;

pub const CROPPED_FACES_DIR: &str = "cropped_faces";
pub const RESTORED_FACES_DIR: &str = "restored_faces";
pub const CMP_DIR: &str = "cmp";
pub const RESTORED_IMGS_DIR: &str = "restored_imgs";

/// Used by [`ExtensionPolicy::Auto`] when the input has no extension.
const FALLBACK_EXTENSION: &str = "png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacePaths {
    pub cropped: PathBuf,
    pub restored: PathBuf,
    pub comparison: PathBuf,
}

/// Every path written for one input image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputSet {
    pub faces: Vec<FacePaths>,
    pub full_image: Option<PathBuf>,
}

impl OutputSet {
    pub fn derive(
        entry: &ImageEntry,
        face_count: usize,
        has_full_image: bool,
        config: &RunConfig,
    ) -> Self {
        if config.in_place {
            return Self {
                faces: Vec::new(),
                full_image: has_full_image.then(|| entry.path.clone()),
            };
        }

        let root = &config.save_root;
        let suffix = config.suffix.as_deref();
        let faces = (0..face_count)
            .map(|idx| FacePaths {
                cropped: root
                    .join(CROPPED_FACES_DIR)
                    .join(indexed_file_name(&entry.basename, idx)),
                restored: root
                    .join(RESTORED_FACES_DIR)
                    .join(face_file_name(&entry.basename, idx, suffix)),
                comparison: root
                    .join(CMP_DIR)
                    .join(indexed_file_name(&entry.basename, idx)),
            })
            .collect();

        let full_image = has_full_image.then(|| {
            let ext = resolve_extension(&config.ext, &entry.extension);
            root.join(RESTORED_IMGS_DIR)
                .join(full_image_file_name(&entry.basename, ext, suffix))
        });

        Self { faces, full_image }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty() && self.full_image.is_none()
    }
}

/// `<basename>_<idx:02>.png`, used for cropped faces and comparisons.
pub fn indexed_file_name(basename: &str, idx: usize) -> String {
    format!("{basename}_{idx:02}.png")
}

/// Restored face file name, with the optional suffix before the extension.
pub fn face_file_name(basename: &str, idx: usize, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{basename}_{idx:02}_{suffix}.png"),
        None => indexed_file_name(basename, idx),
    }
}

pub fn full_image_file_name(basename: &str, ext: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{basename}_{suffix}.{ext}"),
        None => format!("{basename}.{ext}"),
    }
}

/// Extension for the full restored image, without a leading dot.
///
/// `Auto` keeps the input extension's case as-is.
pub fn resolve_extension<'a>(policy: &'a ExtensionPolicy, entry_extension: &'a str) -> &'a str {
    match policy {
        ExtensionPolicy::Fixed(ext) => ext.as_str(),
        ExtensionPolicy::Auto => match entry_extension.strip_prefix('.') {
            Some(ext) if !ext.is_empty() => ext,
            _ => FALLBACK_EXTENSION,
        },
    }
}

/// Place `cropped` and `restored` side by side.
pub fn hconcat(cropped: &RgbImage, restored: &RgbImage) -> Result<RgbImage> {
    let (cw, ch) = cropped.dimensions();
    let (rw, rh) = restored.dimensions();
    if ch != rh {
        return Err(FaceRestoreError::DimensionMismatch {
            cropped: (cw, ch),
            restored: (rw, rh),
        });
    }

    let mut canvas = RgbImage::new(cw + rw, ch);
    canvas.copy_from(cropped, 0, 0)?;
    canvas.copy_from(restored, cw, 0)?;
    Ok(canvas)
}

/// Write every artifact for `entry` and return the paths written.
pub fn route(
    entry: &ImageEntry,
    result: &RestorationResult,
    config: &RunConfig,
) -> Result<OutputSet> {
    let outputs = OutputSet::derive(
        entry,
        result.face_count(),
        result.restored_image.is_some(),
        config,
    );

    for ((cropped, restored), paths) in result.face_pairs().zip(&outputs.faces) {
        save_image(cropped, &paths.cropped)?;
        save_image(restored, &paths.restored)?;
        let cmp = hconcat(cropped, restored)?;
        save_image(&cmp, &paths.comparison)?;
    }

    if let (Some(image), Some(path)) = (&result.restored_image, &outputs.full_image) {
        save_image(image, path)?;
    }

    Ok(outputs)
}

fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| FaceRestoreError::FileSystem {
            path: parent.to_path_buf(),
            operation: "create output directory".to_string(),
            source: e,
        })?;
    }

    image
        .save(path)
        .map_err(|e| FaceRestoreError::ImageProcessing {
            path: path.display().to_string(),
            operation: "save image".to_string(),
            source: Box::new(e),
        })
}
