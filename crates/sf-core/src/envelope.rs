//! SFB1 byte envelope around the bundle JSON.
//!
//! Layout: `b"SFB1"`, one flag byte (bit 0 set when the payload is an lz4
//! block), the uncompressed JSON length as `u32` little endian, then the
//! payload. Plain UTF-8 JSON without the header is accepted on decode.

use crate::error::StoryForgeError;

pub const ENVELOPE_MAGIC: &[u8; 4] = b"SFB1";
pub const ENVELOPE_HEADER_LEN: usize = 9;
const FLAG_LZ4: u8 = 0b0000_0001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBundle {
    pub bytes: Vec<u8>,
    pub compressed: bool,
    pub json_len: usize,
}

pub fn encode_envelope(json: &str, compress: bool) -> Result<EncodedBundle, StoryForgeError> {
    let json_len = u32::try_from(json.len()).map_err(|_| {
        StoryForgeError::new(
            "ENVELOPE_TOO_LARGE",
            format!("Bundle JSON of {} bytes exceeds the envelope limit.", json.len()),
        )
    })?;

    let payload = if compress {
        lz4_flex::block::compress(json.as_bytes())
    } else {
        json.as_bytes().to_vec()
    };

    let mut bytes = Vec::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
    bytes.extend_from_slice(ENVELOPE_MAGIC);
    bytes.push(if compress { FLAG_LZ4 } else { 0 });
    bytes.extend_from_slice(&json_len.to_le_bytes());
    bytes.extend_from_slice(&payload);

    Ok(EncodedBundle {
        bytes,
        compressed: compress,
        json_len: json.len(),
    })
}

pub fn is_envelope(bytes: &[u8]) -> bool {
    bytes.len() >= ENVELOPE_HEADER_LEN && &bytes[..4] == ENVELOPE_MAGIC
}

/// Returns the bundle JSON text carried by `bytes`.
pub fn decode_envelope(bytes: &[u8]) -> Result<String, StoryForgeError> {
    if !is_envelope(bytes) {
        return String::from_utf8(bytes.to_vec())
            .map_err(|error| StoryForgeError::from_display("PARSE_ERROR", error));
    }

    let flags = bytes[4];
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[5..ENVELOPE_HEADER_LEN]);
    let json_len = u32::from_le_bytes(len_bytes) as usize;
    let payload = &bytes[ENVELOPE_HEADER_LEN..];

    let json_bytes = if flags & FLAG_LZ4 != 0 {
        lz4_flex::block::decompress(payload, json_len)
            .map_err(|error| StoryForgeError::from_display("PARSE_ERROR", error))?
    } else {
        payload.to_vec()
    };

    if json_bytes.len() != json_len {
        return Err(StoryForgeError::new(
            "PARSE_ERROR",
            format!(
                "Envelope declares {} bytes but payload holds {}.",
                json_len,
                json_bytes.len()
            ),
        ));
    }

    String::from_utf8(json_bytes).map_err(|error| StoryForgeError::from_display("PARSE_ERROR", error))
}

#[cfg(test)]
mod envelope_tests {
    use super::*;

    const SAMPLE: &str = r#"{"version":"1.1.0","data":{"cards":[{"id":"a"},{"id":"b"},{"id":"c"}]}}"#;

    #[test]
    fn compressed_envelope_decodes_to_original_json() {
        let encoded = encode_envelope(SAMPLE, true).expect("encode");
        assert!(encoded.compressed);
        assert!(is_envelope(&encoded.bytes));
        assert_eq!(encoded.bytes[4], FLAG_LZ4);
        assert_eq!(decode_envelope(&encoded.bytes).expect("decode"), SAMPLE);
    }

    #[test]
    fn uncompressed_envelope_keeps_payload_verbatim() {
        let encoded = encode_envelope(SAMPLE, false).expect("encode");
        assert_eq!(encoded.bytes.len(), ENVELOPE_HEADER_LEN + SAMPLE.len());
        assert_eq!(&encoded.bytes[ENVELOPE_HEADER_LEN..], SAMPLE.as_bytes());
    }

    #[test]
    fn plain_json_bytes_pass_through() {
        assert_eq!(decode_envelope(SAMPLE.as_bytes()).expect("decode"), SAMPLE);
    }

    #[test]
    fn truncated_or_invalid_payload_is_parse_error() {
        let mut encoded = encode_envelope(SAMPLE, false).expect("encode").bytes;
        encoded.truncate(encoded.len() - 3);
        assert_eq!(
            decode_envelope(&encoded).expect_err("length mismatch").code,
            "PARSE_ERROR"
        );

        let invalid_utf8 = [0xff, 0xfe, 0xfd];
        assert_eq!(
            decode_envelope(&invalid_utf8).expect_err("bad utf8").code,
            "PARSE_ERROR"
        );
    }
}
