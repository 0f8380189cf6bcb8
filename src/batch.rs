use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use log::debug;
use walkdir::WalkDir;

use crate::config::RunConfig;
use crate::errors::{FaceRestoreError, Result};
use crate::router;
use crate::traits::{EnhanceOptions, FaceRestorer};

/// Extension of catalog files that live next to the images and are never decoded.
pub const RESERVED_EXTENSION: &str = "bpx";

/// One entry of the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub path: PathBuf,
    /// File name without its extension.
    pub basename: String,
    /// Extension including the leading dot, or empty.
    pub extension: String,
}

impl ImageEntry {
    pub fn new(path: PathBuf) -> Self {
        let basename = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        Self {
            path,
            basename,
            extension,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_reserved(&self) -> bool {
        self.extension
            .strip_prefix('.')
            .is_some_and(|ext| ext.eq_ignore_ascii_case(RESERVED_EXTENSION))
    }
}

/// Counts over every iteration of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub processed: usize,
    pub skipped: usize,
}

/// Drives a restorer over the input directory and routes its outputs.
pub struct BatchDriver<R: FaceRestorer> {
    restorer: R,
    config: RunConfig,
}

impl<R: FaceRestorer> BatchDriver<R> {
    pub const fn new(restorer: R, config: RunConfig) -> Self {
        Self { restorer, config }
    }

    pub fn run(&self) -> Result<RunReport> {
        if !self.config.in_place {
            let save_root = &self.config.save_root;
            fs::create_dir_all(save_root).map_err(|e| FaceRestoreError::FileSystem {
                path: save_root.clone(),
                operation: "create save root".to_string(),
                source: e,
            })?;
        }

        let entries = self.collect_entries()?;
        let options = EnhanceOptions {
            aligned: self.config.aligned,
            only_center_face: self.config.only_center_face,
            paste_back: self.config.paste_back,
        };

        let mut report = RunReport::default();
        for _ in 0..self.config.iterations {
            for entry in &entries {
                if self.process_entry(entry, options)? {
                    report.processed += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }

        println!(
            "Results are in the [{}] folder.",
            self.config.save_root.display()
        );
        Ok(report)
    }

    /// Returns `false` when the entry was skipped.
    fn process_entry(&self, entry: &ImageEntry, options: EnhanceOptions) -> Result<bool> {
        if entry.is_reserved() {
            debug!("skipping reserved entry {}", entry.path.display());
            return Ok(false);
        }

        println!("Processing {} ...", entry.file_name());
        let Some(image) = decode_image(&entry.path) else {
            debug!("no image data in {}", entry.path.display());
            return Ok(false);
        };

        let result = self
            .restorer
            .enhance(&image, options)
            .map_err(|e| FaceRestoreError::ImageProcessing {
                path: entry.path.display().to_string(),
                operation: "face restoration".to_string(),
                source: Box::new(e),
            })?;

        let outputs = router::route(entry, &result, &self.config)?;
        debug!(
            "{}: {} face(s), full image {}",
            entry.file_name(),
            outputs.faces.len(),
            if outputs.full_image.is_some() { "written" } else { "absent" }
        );
        Ok(true)
    }

    /// List the input directory in lexicographic path order.
    ///
    /// Nothing is filtered by type here; non-images fall out at decode time.
    pub fn collect_entries(&self) -> Result<Vec<ImageEntry>> {
        let input_dir = &self.config.input_dir;
        if !input_dir.is_dir() {
            return Err(FaceRestoreError::FileSystem {
                path: input_dir.clone(),
                operation: "list input directory".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "input directory does not exist",
                ),
            });
        }

        Ok(WalkDir::new(input_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by(|a, b| a.path().cmp(b.path()))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .map(|e| ImageEntry::new(e.into_path()))
            .collect())
    }
}

/// Decode `path` as an RGB image, or `None` if it holds no image data.
pub fn decode_image(path: &Path) -> Option<RgbImage> {
    ImageReader::open(path)
        .ok()?
        .with_guessed_format()
        .ok()?
        .decode()
        .ok()
        .map(|image| image.into_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Arch, ExtensionPolicy};
    use crate::mocks::StubRestorer;
    use tempfile::TempDir;

    fn config(input_dir: PathBuf, save_root: PathBuf) -> RunConfig {
        RunConfig {
            upscale: 2,
            iterations: 1,
            arch: Arch::Clean,
            channel: 2,
            model_path: "model.onnx".into(),
            bg_upsampler: None,
            input_dir,
            suffix: None,
            only_center_face: false,
            aligned: false,
            paste_back: true,
            in_place: false,
            save_root,
            ext: ExtensionPolicy::Auto,
            device_id: 0,
        }
    }

    #[test]
    fn test_image_entry_split() {
        let entry = ImageEntry::new(PathBuf::from("inputs/photo.JPG"));
        assert_eq!(entry.basename, "photo");
        assert_eq!(entry.extension, ".JPG");
        assert_eq!(entry.file_name(), "photo.JPG");

        let entry = ImageEntry::new(PathBuf::from("inputs/archive.tar.gz"));
        assert_eq!(entry.basename, "archive.tar");
        assert_eq!(entry.extension, ".gz");

        let entry = ImageEntry::new(PathBuf::from("inputs/README"));
        assert_eq!(entry.basename, "README");
        assert_eq!(entry.extension, "");
    }

    #[test]
    fn test_reserved_extension() {
        assert!(ImageEntry::new(PathBuf::from("a/note.bpx")).is_reserved());
        assert!(ImageEntry::new(PathBuf::from("a/NOTE.BPX")).is_reserved());
        assert!(ImageEntry::new(PathBuf::from("a/note.Bpx")).is_reserved());
        assert!(!ImageEntry::new(PathBuf::from("a/bpx")).is_reserved());
        assert!(!ImageEntry::new(PathBuf::from("a/note.bpx.png")).is_reserved());
    }

    #[test]
    fn test_collect_entries_sorted() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input_dir = temp_dir.path().join("input");
        fs::create_dir_all(input_dir.join("sub"))?;
        for name in ["b.png", "a.png", "c.png", ".hidden.png"] {
            fs::write(input_dir.join(name), b"x")?;
        }

        let driver = BatchDriver::new(
            StubRestorer::new(1),
            config(input_dir, temp_dir.path().join("results")),
        );
        let names: Vec<_> = driver
            .collect_entries()?
            .iter()
            .map(ImageEntry::file_name)
            .collect();

        assert_eq!(names, ["a.png", "b.png", "c.png", "sub"]);
        Ok(())
    }

    #[test]
    fn test_missing_input_directory() {
        let temp_dir = TempDir::new().unwrap();
        let driver = BatchDriver::new(
            StubRestorer::new(1),
            config(temp_dir.path().join("missing"), temp_dir.path().join("results")),
        );
        assert!(matches!(
            driver.run(),
            Err(FaceRestoreError::FileSystem { .. })
        ));
    }

    #[test]
    fn test_decode_image_rejects_non_images() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let text = temp_dir.path().join("notes.txt");
        fs::write(&text, b"not an image")?;

        assert!(decode_image(&text).is_none());
        assert!(decode_image(temp_dir.path()).is_none());
        Ok(())
    }

    #[test]
    fn test_decode_image_sniffs_format() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("no_extension");
        RgbImage::new(3, 2).save_with_format(&path, image::ImageFormat::Png)?;

        assert_eq!(decode_image(&path).map(|i| i.dimensions()), Some((3, 2)));
        Ok(())
    }
}
