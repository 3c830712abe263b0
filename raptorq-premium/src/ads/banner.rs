//! Banner image checks.
//!
//! Only PNG is accepted. Dimensions come from the IHDR chunk, which the
//! format requires to be first, so the image is never decoded.

use raptorq_lib::{EngineError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

pub const MIN_WIDTH: u32 = 200;
pub const MAX_WIDTH: u32 = 800;
pub const MIN_HEIGHT: u32 = 50;
pub const MAX_HEIGHT: u32 = 200;
pub const MAX_BANNER_BYTES: usize = 2 * 1024 * 1024;
/// Anything smaller is treated as an empty placeholder.
pub const MIN_BANNER_BYTES: usize = 1024;

/// signature(8) + chunk length(4) + "IHDR"(4) + width(4) + height(4)
pub(crate) const IHDR_END: usize = 24;

/// Facts about an accepted banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerInfo {
    pub width: u32,
    pub height: u32,
    pub size_bytes: usize,
    /// Hex SHA-256 of the image, stored on the slot as its banner reference.
    pub content_hash: String,
}

/// Check format, dimensions and size.
pub fn validate_banner(data: &[u8]) -> Result<BannerInfo> {
    if data.len() > MAX_BANNER_BYTES {
        return Err(EngineError::InvalidBanner(format!(
            "{} bytes exceeds the {} byte limit",
            data.len(),
            MAX_BANNER_BYTES
        )));
    }
    if data.len() < MIN_BANNER_BYTES {
        return Err(EngineError::InvalidBanner(format!(
            "{} bytes is below the {} byte minimum",
            data.len(),
            MIN_BANNER_BYTES
        )));
    }
    if data[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return Err(EngineError::InvalidBanner("not a PNG image".to_string()));
    }
    if &data[12..16] != b"IHDR" {
        return Err(EngineError::InvalidBanner("missing IHDR chunk".to_string()));
    }

    let width = read_u32(&data[16..20]);
    let height = read_u32(&data[20..IHDR_END]);
    if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) || !(MIN_HEIGHT..=MAX_HEIGHT).contains(&height) {
        return Err(EngineError::InvalidBanner(format!(
            "{}x{} outside {}-{} x {}-{}",
            width, height, MIN_WIDTH, MAX_WIDTH, MIN_HEIGHT, MAX_HEIGHT
        )));
    }

    Ok(BannerInfo {
        width,
        height,
        size_bytes: data.len(),
        content_hash: hex::encode(Sha256::digest(data)),
    })
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::png_banner as png_fixture;

    #[test]
    fn test_accepts_600x120() {
        let info = validate_banner(&png_fixture(600, 120, 4096)).unwrap();
        assert_eq!((info.width, info.height), (600, 120));
        assert_eq!(info.size_bytes, 4096);
        assert_eq!(info.content_hash.len(), 64);
    }

    #[test]
    fn test_rejects_1920x400() {
        let err = validate_banner(&png_fixture(1920, 400, 4096)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidBanner(_)));
    }

    #[test]
    fn test_dimension_bounds_inclusive() {
        assert!(validate_banner(&png_fixture(200, 50, 2048)).is_ok());
        assert!(validate_banner(&png_fixture(800, 200, 2048)).is_ok());
        assert!(validate_banner(&png_fixture(199, 100, 2048)).is_err());
        assert!(validate_banner(&png_fixture(400, 201, 2048)).is_err());
    }

    #[test]
    fn test_size_limits() {
        assert!(validate_banner(&png_fixture(600, 120, MAX_BANNER_BYTES)).is_ok());
        assert!(validate_banner(&png_fixture(600, 120, MAX_BANNER_BYTES + 1)).is_err());
        assert!(validate_banner(&png_fixture(600, 120, MIN_BANNER_BYTES - 1)).is_err());
        assert!(validate_banner(&[]).is_err());
    }

    #[test]
    fn test_rejects_other_formats() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        jpeg.resize(4096, 0);
        assert!(validate_banner(&jpeg).is_err());

        let mut no_ihdr = png_fixture(600, 120, 4096);
        no_ihdr[12..16].copy_from_slice(b"tEXt");
        assert!(validate_banner(&no_ihdr).is_err());
    }
}
