use std::fmt;

use anyhow::{Result, anyhow};
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};

const BINARY_CHECK_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Override,
    Bom,
    Detector,
    AssumedUtf8,
}

impl fmt::Display for EncodingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EncodingSource::Override => "override",
            EncodingSource::Bom => "bom",
            EncodingSource::Detector => "detector",
            EncodingSource::AssumedUtf8 => "assumed-utf8",
        };
        f.write_str(label)
    }
}

/// How a document was decoded, so it can be written back the same way.
#[derive(Debug, Clone, Copy)]
pub struct TextFormat {
    pub encoding: &'static Encoding,
    pub source: EncodingSource,
    pub bom: bool,
}

#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub had_errors: bool,
    pub format: TextFormat,
}

#[derive(Debug, Clone, Default)]
pub struct EncodingStrategy {
    override_encoding: Option<&'static Encoding>,
}

impl EncodingStrategy {
    pub fn new(override_label: Option<&str>) -> Result<Self> {
        let Some(label) = override_label else {
            return Ok(Self::default());
        };
        let trimmed = label.trim();
        let encoding = Encoding::for_label(trimmed.as_bytes())
            .ok_or_else(|| anyhow!("unknown encoding override '{trimmed}'"))?;
        Ok(Self {
            override_encoding: Some(encoding),
        })
    }

    /// `None` for content that looks binary: such leaves have no text document.
    pub fn decode(&self, bytes: &[u8]) -> Option<DecodedText> {
        if looks_binary(bytes) {
            return None;
        }
        let bom = bom_encoding(bytes);
        let (encoding, source) = match (self.override_encoding, bom) {
            (Some(encoding), _) => (encoding, EncodingSource::Override),
            (None, Some((encoding, _))) => (encoding, EncodingSource::Bom),
            (None, None) if std::str::from_utf8(bytes).is_ok() => {
                (UTF_8, EncodingSource::AssumedUtf8)
            }
            (None, None) => {
                let mut detector = EncodingDetector::new();
                detector.feed(bytes, true);
                (detector.guess(None, true), EncodingSource::Detector)
            }
        };
        let has_bom = bom.is_some_and(|(bom_encoding, _)| bom_encoding == encoding);
        let (text, had_errors) = if has_bom {
            let (cow, had_errors) = encoding.decode_with_bom_removal(bytes);
            (cow.into_owned(), had_errors)
        } else {
            let (cow, had_errors) = encoding.decode_without_bom_handling(bytes);
            (cow.into_owned(), had_errors)
        };
        Some(DecodedText {
            text,
            had_errors,
            format: TextFormat {
                encoding,
                source,
                bom: has_bom,
            },
        })
    }
}

impl TextFormat {
    /// Encodes `text` back into the original encoding, restoring the BOM.
    /// The flag reports unmappable characters.
    pub fn encode(&self, text: &str) -> (Vec<u8>, bool) {
        let mut out = Vec::with_capacity(text.len() + 3);
        if self.bom {
            out.extend_from_slice(bom_bytes(self.encoding));
        }
        if self.encoding == UTF_16LE || self.encoding == UTF_16BE {
            // encoding_rs only encodes to UTF-8 compatible outputs.
            for unit in text.encode_utf16() {
                let pair = if self.encoding == UTF_16LE {
                    unit.to_le_bytes()
                } else {
                    unit.to_be_bytes()
                };
                out.extend_from_slice(&pair);
            }
            return (out, false);
        }
        let (encoded, _, had_errors) = self.encoding.encode(text);
        out.extend_from_slice(&encoded);
        (out, had_errors)
    }
}

fn looks_binary(bytes: &[u8]) -> bool {
    if bom_encoding(bytes).is_some_and(|(encoding, _)| encoding != UTF_8) {
        return false;
    }
    let window = &bytes[..bytes.len().min(BINARY_CHECK_BYTES)];
    window.contains(&0)
}

fn bom_encoding(bytes: &[u8]) -> Option<(&'static Encoding, usize)> {
    Encoding::for_bom(bytes)
}

fn bom_bytes(encoding: &'static Encoding) -> &'static [u8] {
    const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
    const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
    const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];
    if encoding == UTF_8 {
        UTF8_BOM
    } else if encoding == UTF_16LE {
        UTF16LE_BOM
    } else if encoding == UTF_16BE {
        UTF16BE_BOM
    } else {
        &[]
    }
}
