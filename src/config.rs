use clap::{Parser, ValueEnum};
use image::ImageFormat;
use log::warn;
use std::path::{PathBuf, MAIN_SEPARATOR};

/// Background upsampler name that enables Real-ESRGAN.
pub const REALESRGAN: &str = "realesrgan";

/// Context pixels added around every background tile.
pub const BG_TILE_PAD: u32 = 10;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Final upsampling scale of the image
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    pub upscale: u32,

    /// Number of full passes over the input directory
    #[arg(long, default_value_t = 1)]
    pub iterations: u32,

    #[arg(long, value_enum, default_value_t = Arch::Clean)]
    pub arch: Arch,

    /// Channel multiplier of the restoration model
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    pub channel: u32,

    #[arg(
        long = "model_path",
        default_value = "experiments/pretrained_models/GFPGANCleanv1-NoCE-C2.onnx"
    )]
    pub model_path: PathBuf,

    /// Background upsampler; anything other than `realesrgan` disables it
    #[arg(long = "bg_upsampler", default_value = REALESRGAN)]
    pub bg_upsampler: String,

    /// Tile size for the background upsampler, 0 for no tiling
    #[arg(long = "bg_tile", default_value_t = 400)]
    pub bg_tile: u32,

    #[arg(
        long = "bg_model_path",
        default_value = "experiments/pretrained_models/RealESRGAN_x2plus.onnx"
    )]
    pub bg_model_path: PathBuf,

    /// Input image directory
    #[arg(long = "test_path", default_value = "inputs/whole_imgs")]
    pub test_path: String,

    /// Suffix of the restored faces
    #[arg(long)]
    pub suffix: Option<String>,

    #[arg(long = "only_center_face")]
    pub only_center_face: bool,

    #[arg(long)]
    pub aligned: bool,

    /// Do NOT paste the restored faces back into the full image
    #[arg(long = "paste_back")]
    pub disable_paste_back: bool,

    #[arg(long = "save_root", default_value = "results")]
    pub save_root: PathBuf,

    /// Overwrite the input images with the restored images
    #[arg(long = "in-place")]
    pub in_place: bool,

    /// Image extension: `auto` keeps the input extension
    #[arg(long, default_value = "auto", value_parser = check_ext)]
    pub ext: String,

    #[arg(long = "device_id", default_value_t = 0)]
    pub device_id: i32,
}

/// Restoration model architecture variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Arch {
    #[value(name = "clean")]
    Clean,
    #[value(name = "original")]
    Original,
    #[value(name = "bilinear")]
    Bilinear,
    #[value(name = "RestoreFormer")]
    RestoreFormer,
}

/// How the extension of the full restored image is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionPolicy {
    /// Reuse the input file's extension verbatim.
    Auto,
    Fixed(String),
}

impl ExtensionPolicy {
    fn parse(s: &str) -> Self {
        if s == "auto" {
            Self::Auto
        } else {
            Self::Fixed(s.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsamplerSettings {
    pub model_path: PathBuf,
    pub tile: u32,
    pub tile_pad: u32,
}

/// Configuration resolved once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub upscale: u32,
    pub iterations: u32,
    pub arch: Arch,
    pub channel: u32,
    pub model_path: PathBuf,
    /// `None` when not requested or no accelerator is available.
    pub bg_upsampler: Option<UpsamplerSettings>,
    pub input_dir: PathBuf,
    pub suffix: Option<String>,
    pub only_center_face: bool,
    pub aligned: bool,
    pub paste_back: bool,
    pub in_place: bool,
    pub save_root: PathBuf,
    pub ext: ExtensionPolicy,
    pub device_id: i32,
}

impl RunConfig {
    /// Resolve command line options into a run configuration.
    ///
    /// `device_available` is only consulted when the background upsampler is
    /// requested.
    pub fn resolve(cli: Cli, device_available: impl FnOnce() -> bool) -> Self {
        let bg_upsampler = if cli.bg_upsampler == REALESRGAN {
            if device_available() {
                Some(UpsamplerSettings {
                    model_path: cli.bg_model_path,
                    tile: cli.bg_tile,
                    tile_pad: BG_TILE_PAD,
                })
            } else {
                warn!(
                    "The unoptimized RealESRGAN is very slow on CPU. We do not use it. \
                     Background upsampling is disabled for this run."
                );
                None
            }
        } else {
            None
        };

        Self {
            upscale: cli.upscale,
            iterations: cli.iterations,
            arch: cli.arch,
            channel: cli.channel,
            model_path: cli.model_path,
            bg_upsampler,
            input_dir: strip_trailing_separator(&cli.test_path),
            suffix: cli.suffix,
            only_center_face: cli.only_center_face,
            aligned: cli.aligned,
            paste_back: !cli.disable_paste_back,
            in_place: cli.in_place,
            save_root: cli.save_root,
            ext: ExtensionPolicy::parse(&cli.ext),
            device_id: cli.device_id,
        }
    }
}

/// Strip exactly one trailing path separator. A bare root is kept.
pub fn strip_trailing_separator(path: &str) -> PathBuf {
    let stripped = path
        .strip_suffix('/')
        .or_else(|| path.strip_suffix(MAIN_SEPARATOR));
    match stripped {
        Some(rest) if !rest.is_empty() => PathBuf::from(rest),
        _ => PathBuf::from(path),
    }
}

fn check_ext(s: &str) -> Result<String, String> {
    if s == "auto" {
        return Ok(s.to_string());
    }

    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Use `auto` or one of: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}
