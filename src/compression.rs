//! Block compression codecs
//!
//! The block store delegates compression here; this layer never decides block
//! boundaries, it only turns a block's byte buffer into compressed frames and
//! back. Each frame covers one chunk-shaped window of the buffer so a block
//! read never decompresses data from an unrelated block.

use crate::error::{Result, VolumeError};
use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Compression methods available for block buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionMethod {
    /// No compression
    None = 0,
    /// Deflate
    Deflate = 1,
    /// Run-length encoding; effective on sparse label rasters
    Rle = 2,
    /// Zstandard
    Zstd = 3,
}

impl CompressionMethod {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Deflate),
            2 => Some(CompressionMethod::Rle),
            3 => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }
}

/// A block buffer codec
pub trait Codec: Send + Sync {
    /// Compress one frame
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress one frame
    fn decode(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>>;

    fn method(&self) -> CompressionMethod;
}

/// Pass-through codec
#[derive(Debug, Default)]
pub struct NoneCodec;

impl Codec for NoneCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }
}

/// Deflate codec
#[derive(Debug)]
pub struct DeflateCodec {
    level: u32,
}

impl DeflateCodec {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl Codec for DeflateCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(data, FlateCompression::new(self.level));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| VolumeError::Compression(e.to_string()))?;
        Ok(compressed)
    }

    fn decode(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(data);
        let mut decompressed = match expected_size {
            Some(size) => Vec::with_capacity(size),
            None => Vec::new(),
        };
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| VolumeError::Decompression(e.to_string()))?;
        Ok(decompressed)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Deflate
    }
}

/// Zstandard codec
#[derive(Debug)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl Codec for ZstdCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(|e| VolumeError::Compression(e.to_string()))
    }

    fn decode(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| VolumeError::Decompression(e.to_string()))
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zstd
    }
}

/// Run-length codec over the raw byte stream: (count, value) pairs.
/// Label blocks are dominated by zero runs, where this is hard to beat.
#[derive(Debug, Default)]
pub struct RleCodec;

impl RleCodec {
    fn encode_internal(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < data.len() {
            let byte = data[i];
            let mut count = 1usize;
            while i + count < data.len() && data[i + count] == byte && count < 255 {
                count += 1;
            }
            out.push(count as u8);
            out.push(byte);
            i += count;
        }
        out
    }

    fn decode_internal(data: &[u8]) -> Result<Vec<u8>> {
        if data.len() % 2 != 0 {
            return Err(VolumeError::Decompression(
                "RLE data must have even length".to_string(),
            ));
        }
        let mut out = Vec::new();
        for pair in data.chunks_exact(2) {
            out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
        }
        Ok(out)
    }
}

impl Codec for RleCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(Self::encode_internal(data))
    }

    fn decode(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        Self::decode_internal(data)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Rle
    }
}

/// Get a codec for the given method with default settings
pub fn codec_for(method: CompressionMethod) -> Box<dyn Codec> {
    match method {
        CompressionMethod::None => Box::new(NoneCodec),
        CompressionMethod::Deflate => Box::new(DeflateCodec::default()),
        CompressionMethod::Rle => Box::new(RleCodec),
        CompressionMethod::Zstd => Box::new(ZstdCodec::default()),
    }
}

/// Encode a block buffer as independently compressed frames of at most
/// `frame_len` bytes each, prefixed with their compressed length.
pub fn encode_frames(codec: &dyn Codec, data: &[u8], frame_len: usize) -> Result<Vec<u8>> {
    let frame_len = if frame_len == 0 { data.len().max(1) } else { frame_len };
    let mut out = Vec::new();
    for frame in data.chunks(frame_len) {
        let compressed = codec.encode(frame)?;
        out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        out.extend_from_slice(&compressed);
    }
    Ok(out)
}

/// Decode a framed block buffer produced by [`encode_frames`]
pub fn decode_frames(codec: &dyn Codec, data: &[u8], frame_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(VolumeError::Decompression(
                "truncated frame header".to_string(),
            ));
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if rest.len() < len {
            return Err(VolumeError::Decompression(format!(
                "frame of {} bytes exceeds remaining {} bytes",
                len,
                rest.len()
            )));
        }
        out.extend_from_slice(&codec.decode(&rest[..len], Some(frame_len))?);
        rest = &rest[len..];
    }
    Ok(out)
}
