//! Thin adapter over the three payload encodings a robot's map may arrive
//! in: raw JSON, zlib-compressed JSON, or a PNG carrying a `zTXt` chunk of
//! zlib-compressed JSON. The transport that fetches these bytes, and the
//! mapping from wire shape to [`crate::mapmodel::Map`] fields beyond this
//! adapter, are external collaborators — this module only gets raw bytes
//! into a decoded [`Map`].

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::errors::DecodeError;
use crate::mapmodel::Map;

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const ZTXT_CHUNK_TYPE: &[u8; 4] = b"zTXt";

/// Decodes a raw map payload, auto-detecting the encoding.
pub fn decode(bytes: &[u8]) -> Result<Map, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }
    if bytes.starts_with(&PNG_MAGIC) {
        let json = extract_ztxt_json(bytes)?;
        return Ok(serde_json::from_str(&json)?);
    }
    if looks_like_zlib(bytes) {
        let json = inflate_to_string(bytes)?;
        return Ok(serde_json::from_str(&json)?);
    }
    if looks_like_json(bytes) {
        return Ok(serde_json::from_slice(bytes)?);
    }
    Err(DecodeError::UnknownEncoding)
}

fn looks_like_json(bytes: &[u8]) -> bool {
    bytes.iter().find(|b| !b.is_ascii_whitespace()).is_some_and(|&b| b == b'{' || b == b'[')
}

/// zlib streams start with a 2-byte header whose first nibble is the
/// compression method (8 = deflate) and whose 16-bit value is a multiple of
/// 31 (the spec's check bits).
fn looks_like_zlib(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && (bytes[0] & 0x0F) == 8 && (((bytes[0] as u16) << 8) | bytes[1] as u16) % 31 == 0
}

fn inflate_to_string(bytes: &[u8]) -> Result<String, DecodeError> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = String::new();
    decoder.read_to_string(&mut out).map_err(DecodeError::Zlib)?;
    Ok(out)
}

/// Scans a PNG's chunk stream for a `zTXt` chunk and returns its decoded
/// text: keyword, a null terminator, a one-byte compression method, then
/// zlib-compressed text.
fn extract_ztxt_json(bytes: &[u8]) -> Result<String, DecodeError> {
    let mut cursor = PNG_MAGIC.len();
    while cursor + 8 <= bytes.len() {
        let length = u32::from_be_bytes(
            bytes[cursor..cursor + 4].try_into().map_err(|_| DecodeError::MalformedPng)?,
        ) as usize;
        let chunk_type: [u8; 4] =
            bytes[cursor + 4..cursor + 8].try_into().map_err(|_| DecodeError::MalformedPng)?;
        let data_start = cursor + 8;
        let data_end = data_start.checked_add(length).ok_or(DecodeError::MalformedPng)?;
        if data_end + 4 > bytes.len() {
            return Err(DecodeError::MalformedPng);
        }
        if &chunk_type == ZTXT_CHUNK_TYPE {
            let data = &bytes[data_start..data_end];
            let null_pos = data.iter().position(|&b| b == 0).ok_or(DecodeError::MalformedPng)?;
            // Byte after the keyword's null terminator is the compression method.
            let compressed = &data[null_pos + 2..];
            return inflate_to_string(compressed);
        }
        cursor = data_end + 4; // skip CRC
    }
    Err(DecodeError::MissingZtxtChunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    fn sample_map_json() -> String {
        serde_json::json!({
            "pixelSize": 50,
            "size": [10, 10],
            "metadata": {"version": "1", "nonce": "abc", "totalLayerArea": 0.0},
            "layers": [],
            "entities": [],
            "normalized": false,
        })
        .to_string()
    }

    #[test]
    fn decodes_raw_json() {
        let map = decode(sample_map_json().as_bytes()).unwrap();
        assert_eq!(map.pixel_size, 50);
    }

    #[test]
    fn decodes_zlib_json() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(sample_map_json().as_bytes()).unwrap();
        let compressed = enc.finish().unwrap();
        let map = decode(&compressed).unwrap();
        assert_eq!(map.pixel_size, 50);
    }

    #[test]
    fn decodes_png_ztxt() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(sample_map_json().as_bytes()).unwrap();
        let compressed = enc.finish().unwrap();

        let mut ztxt_data = Vec::new();
        ztxt_data.extend_from_slice(b"map\0"); // keyword + null terminator
        ztxt_data.push(0); // compression method
        ztxt_data.extend_from_slice(&compressed);

        let mut png = Vec::new();
        png.extend_from_slice(&PNG_MAGIC);
        png.extend_from_slice(&(ztxt_data.len() as u32).to_be_bytes());
        png.extend_from_slice(ZTXT_CHUNK_TYPE);
        png.extend_from_slice(&ztxt_data);
        png.extend_from_slice(&[0u8; 4]); // fake CRC, unchecked by this decoder

        let map = decode(&png).unwrap();
        assert_eq!(map.pixel_size, 50);
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(decode(&[]), Err(DecodeError::EmptyPayload)));
    }
}
