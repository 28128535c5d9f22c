use std::io::Cursor;
use std::str::FromStr;

use image::{imageops, DynamicImage, ImageBuffer, ImageFormat, Luma};
use qrcode::types::QrError;
use qrcode::QrCode;
use serde::Deserialize;
use thiserror::Error;

/// Smallest pixel size of one QR module.
pub const MIN_MODULE_SCALE: u32 = 8;
const MAX_MODULE_SCALE: u32 = 32;
const DEFAULT_MARGIN: u32 = 2;

/// QR error correction strength. `H` survives roughly 30% of the symbol
/// being damaged or covered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum EcLevel {
    #[serde(alias = "l")]
    L,
    #[serde(alias = "m")]
    M,
    #[serde(alias = "q")]
    Q,
    #[default]
    #[serde(alias = "h")]
    H,
}

impl From<EcLevel> for qrcode::EcLevel {
    fn from(level: EcLevel) -> Self {
        match level {
            EcLevel::L => qrcode::EcLevel::L,
            EcLevel::M => qrcode::EcLevel::M,
            EcLevel::Q => qrcode::EcLevel::Q,
            EcLevel::H => qrcode::EcLevel::H,
        }
    }
}

impl FromStr for EcLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "L" | "l" => Ok(EcLevel::L),
            "M" | "m" => Ok(EcLevel::M),
            "Q" | "q" => Ok(EcLevel::Q),
            "H" | "h" => Ok(EcLevel::H),
            other => Err(format!("unknown error correction level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub ec_level: EcLevel,
    /// Pixels per module. Clamped to `MIN_MODULE_SCALE..=32`.
    pub module_scale: u32,
    /// Quiet zone width in modules.
    pub margin: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            ec_level: EcLevel::H,
            module_scale: MIN_MODULE_SCALE,
            margin: DEFAULT_MARGIN,
        }
    }
}

impl RenderOptions {
    pub fn with_ec_level(mut self, ec_level: EcLevel) -> Self {
        self.ec_level = ec_level;
        self
    }

    pub fn with_module_scale(mut self, module_scale: u32) -> Self {
        self.module_scale = module_scale;
        self
    }

    fn effective_scale(&self) -> u32 {
        self.module_scale.clamp(MIN_MODULE_SCALE, MAX_MODULE_SCALE)
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("token is empty")]
    EmptyToken,

    #[error("token does not fit in a QR code: {0}")]
    Capacity(QrError),

    #[error("failed to encode PNG")]
    Encode(#[from] image::ImageError),
}

/// Whether `token` fits in the largest QR symbol at `level`.
pub fn fits(token: &str, level: EcLevel) -> bool {
    QrCode::with_error_correction_level(token.as_bytes(), level.into()).is_ok()
}

/// Renders `token` as a greyscale PNG QR code.
pub fn render_image(token: &str, options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
    if token.is_empty() {
        return Err(RenderError::EmptyToken);
    }

    let code = QrCode::with_error_correction_level(token.as_bytes(), options.ec_level.into())
        .map_err(RenderError::Capacity)?;

    let scale = options.effective_scale();
    let modules: ImageBuffer<Luma<u8>, Vec<u8>> = code
        .render::<Luma<u8>>()
        .quiet_zone(false)
        .module_dimensions(scale, scale)
        .build();

    let border = options.margin * scale;
    let mut canvas = ImageBuffer::from_pixel(
        modules.width() + 2 * border,
        modules.height() + 2 * border,
        Luma([255u8]),
    );
    imageops::overlay(&mut canvas, &modules, i64::from(border), i64::from(border));

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(canvas).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}
