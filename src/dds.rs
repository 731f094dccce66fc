use thiserror::Error;

/// Fixed header length stripped on decode and written on encode.
pub const HEADER_SIZE: usize = 128;

/// Block-compression formats recognized by the target engine. DXT3 data
/// is decoded as DXT5; the engine treats them interchangeably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DxtFormat {
    Dxt1,
    Dxt5,
}

impl DxtFormat {
    fn four_cc(self) -> &'static [u8; 4] {
        match self {
            DxtFormat::Dxt1 => b"DXT1",
            DxtFormat::Dxt5 => b"DXT5",
        }
    }
}

/// Pixel-block payload with its dimensions and format, as handed to the
/// material adapter. The payload bytes are whatever followed the header,
/// unmodified.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTexture {
    pub width: u32,
    pub height: u32,
    pub format: DxtFormat,
    pub data: Vec<u8>,
}

/// Hard failures of the texture container codec. These abort the
/// encompassing import or export call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DdsError {
    #[error("texture buffer is too short for a DDS header ({len} bytes, need {HEADER_SIZE})")]
    Truncated { len: usize },
    #[error("invalid DDS texture: header structure size is {found}, expected 124")]
    BadHeaderSize { found: u8 },
    #[error("pixel buffer length {len} does not match {width}x{height} RGBA")]
    PixelSizeMismatch { len: usize, width: u32, height: u32 },
}

/// Decodes a DDS container: validates the structure-size field, reads the
/// dimensions and format tag, strips the 128-byte header and returns the
/// rest untouched.
///
/// Dimensions are stored as 16-bit values; textures larger than 65535 on
/// a side are not representable in this container and out of scope.
pub fn decode(bytes: &[u8]) -> Result<DecodedTexture, DdsError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DdsError::Truncated { len: bytes.len() });
    }
    if bytes[4] != 124 {
        return Err(DdsError::BadHeaderSize { found: bytes[4] });
    }

    let height = u16::from_le_bytes([bytes[12], bytes[13]]) as u32;
    let width = u16::from_le_bytes([bytes[16], bytes[17]]) as u32;

    let four_cc = &bytes[84..88];
    let format = if four_cc == b"DXT3" || four_cc == b"DXT5" {
        DxtFormat::Dxt5
    } else {
        DxtFormat::Dxt1
    };

    Ok(DecodedTexture {
        width,
        height,
        format,
        data: bytes[HEADER_SIZE..].to_vec(),
    })
}

/// Encodes an RGBA buffer (4 bytes per pixel, row major) into the DDS
/// container layout the target engine expects, byte for byte.
///
/// The pixel bytes are written uncompressed under a block-compression
/// format tag, exactly as the original tool does. The engine's decode
/// path performs no compression-ratio validation, so the pair stays
/// self-consistent; strictly speaking the output is not a valid DXTn
/// container. Kept for bit compatibility.
pub fn encode(
    rgba: &[u8],
    width: u32,
    height: u32,
    format: DxtFormat,
) -> Result<Vec<u8>, DdsError> {
    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(DdsError::PixelSizeMismatch {
            len: rgba.len(),
            width,
            height,
        });
    }

    let mut out = Vec::with_capacity(HEADER_SIZE + rgba.len());
    out.extend_from_slice(b"DDS ");
    out.extend_from_slice(&124u32.to_le_bytes()); // structure size
    out.extend_from_slice(&0u32.to_le_bytes()); // flags
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // pitch or linear size
    out.extend_from_slice(&0u32.to_le_bytes()); // depth
    out.extend_from_slice(&1u32.to_le_bytes()); // mip count
    out.extend_from_slice(&[0u8; 44]); // reserved

    // Pixel-format sub-block.
    out.extend_from_slice(&32u32.to_le_bytes()); // sub-block size
    out.extend_from_slice(&[0x41, 0x00, 0x00, 0x00]); // legacy flags
    out.extend_from_slice(format.four_cc());
    out.extend_from_slice(&32u32.to_le_bytes()); // bit count
    out.extend_from_slice(&0xFF00_0000u32.to_be_bytes()); // R mask
    out.extend_from_slice(&0x00FF_0000u32.to_be_bytes()); // G mask
    out.extend_from_slice(&0x0000_FF00u32.to_be_bytes()); // B mask
    out.extend_from_slice(&0x0000_00FFu32.to_be_bytes()); // A mask

    out.extend_from_slice(&[0x00, 0x01, 0x00, 0x00]); // caps
    out.extend_from_slice(&0u32.to_le_bytes()); // caps2
    out.extend_from_slice(&0u32.to_le_bytes()); // caps3
    out.extend_from_slice(&0u32.to_le_bytes()); // caps4
    out.extend_from_slice(&0u32.to_le_bytes()); // reserved trailer

    debug_assert_eq!(out.len(), HEADER_SIZE);
    out.extend_from_slice(rgba);
    Ok(out)
}
