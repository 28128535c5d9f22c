//! Registration tokens and their QR rendering.
//!
//! A token is the registration metadata serialized as JSON and then base64
//! encoded, so the same ASCII string can be stored in the attendance row,
//! embedded in a QR image and typed into a URL without escaping.

mod render;
mod token;

pub use render::{fits, render_image, EcLevel, RenderError, RenderOptions, MIN_MODULE_SCALE};
pub use token::{decode, encode, validate, DecodeError, TokenMetadata, ValidationError};
