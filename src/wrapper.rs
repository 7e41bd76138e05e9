//! Android bitcode wrapper header.
//!
//! RenderScript bitcode is shipped inside the generic bitcode wrapper
//! (`0x0B17C0DE`). The Android flavour reuses the fourth header word as a
//! header version and appends the target API, a PNaCl version and a list of
//! tagged fields that carry the compiler version and optimization level:
//!
//! ```text
//! u32 magic, u32 version, u32 bitcode offset, u32 bitcode size,
//! u32 header version, u32 target api, u32 pnacl version,
//! { u16 tag, u16 length, length bytes (padded to 4) }*   // up to the bitcode offset
//! ```

use tracing::warn;

use crate::bitcode::Signature;

/// Fixed part of the header: seven 32-bit words
const FIXED_HEADER_LEN: usize = 28;

/// Tag of the compiler version field
pub const TAG_COMPILER_VERSION: u16 = 0x4001;
/// Tag of the optimization level field
pub const TAG_OPTIMIZATION_LEVEL: u16 = 0x4002;

/// Decoded Android wrapper header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AndroidWrapper {
    pub header_version: u32,
    pub target_api: u32,
    pub pnacl_version: u32,
    pub compiler_version: u32,
    pub optimization_level: u32,
}

impl AndroidWrapper {
    /// Decode the Android header of a wrapped bitcode file.
    ///
    /// Returns `None` for raw bitcode, or when the header is too short to be
    /// an Android one. Truncated tagged fields end the scan.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (signature, _) = Signature::parse(data)?;
        if !signature.is_wrapper() {
            return None;
        }
        let header = data.get(..(signature.offset as usize).min(data.len()))?;
        if header.len() < FIXED_HEADER_LEN {
            return None;
        }
        let word = |index: usize| {
            let at = index * 4;
            u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };
        let mut wrapper = AndroidWrapper {
            header_version: word(4),
            target_api: word(5),
            pnacl_version: word(6),
            ..Default::default()
        };

        let mut fields = &header[FIXED_HEADER_LEN..];
        while let Some((tag_len, rest)) = fields.split_first_chunk::<4>() {
            let tag = u16::from_le_bytes([tag_len[0], tag_len[1]]);
            let len = u16::from_le_bytes([tag_len[2], tag_len[3]]) as usize;
            let padded = (len + 3) & !3;
            let Some(value) = rest.get(..len) else {
                warn!(tag, len, "truncated bitcode wrapper field");
                break;
            };
            let as_u32 = <[u8; 4]>::try_from(value).ok().map(u32::from_le_bytes);
            match (tag, as_u32) {
                (TAG_COMPILER_VERSION, Some(v)) => wrapper.compiler_version = v,
                (TAG_OPTIMIZATION_LEVEL, Some(v)) => wrapper.optimization_level = v,
                _ => warn!(tag, len, "skipping unknown bitcode wrapper field"),
            }
            fields = rest.get(padded..).unwrap_or_default();
        }
        Some(wrapper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcode::LLVM_BITCODE_WRAPPER_MAGIC;

    fn wrap(fields: &[(u16, &[u8])], stream: &[u8]) -> Vec<u8> {
        let mut tail = Vec::new();
        for (tag, value) in fields {
            tail.extend_from_slice(&tag.to_le_bytes());
            tail.extend_from_slice(&(value.len() as u16).to_le_bytes());
            tail.extend_from_slice(value);
            while tail.len() % 4 != 0 {
                tail.push(0);
            }
        }
        let offset = (FIXED_HEADER_LEN + tail.len()) as u32;
        let mut data = Vec::new();
        for word in [
            LLVM_BITCODE_WRAPPER_MAGIC,
            0,
            offset,
            stream.len() as u32,
            1,
            21,
            0,
        ] {
            data.extend_from_slice(&word.to_le_bytes());
        }
        data.extend_from_slice(&tail);
        data.extend_from_slice(stream);
        data
    }

    #[test]
    fn reads_tagged_fields() {
        let data = wrap(
            &[
                (0x1234, &[1, 2]),
                (TAG_COMPILER_VERSION, &23u32.to_le_bytes()),
                (TAG_OPTIMIZATION_LEVEL, &2u32.to_le_bytes()),
            ],
            &[b'B', b'C', 0xC0, 0xDE],
        );
        let wrapper = AndroidWrapper::parse(&data).unwrap();
        assert_eq!(
            wrapper,
            AndroidWrapper {
                header_version: 1,
                target_api: 21,
                pnacl_version: 0,
                compiler_version: 23,
                optimization_level: 2,
            }
        );
    }

    #[test]
    fn raw_bitcode_has_no_wrapper() {
        assert_eq!(AndroidWrapper::parse(&[b'B', b'C', 0xC0, 0xDE]), None);
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let data = wrap(&[], &[b'B', b'C', 0xC0, 0xDE]);
        let wrapper = AndroidWrapper::parse(&data).unwrap();
        assert_eq!(wrapper.compiler_version, 0);
        assert_eq!(wrapper.optimization_level, 0);
        assert_eq!(wrapper.target_api, 21);
    }
}
