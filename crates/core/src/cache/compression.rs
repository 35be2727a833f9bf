//! Compression utilities for stored payloads.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;

/// Compression algorithm applied to a stored payload.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    #[default]
    Zstd,
    Gzip,
}

impl CompressionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Zstd => "zstd",
            CompressionType::Gzip => "gzip",
        }
    }
}

impl FromStr for CompressionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CompressionType::None),
            "zstd" => Ok(CompressionType::Zstd),
            "gzip" => Ok(CompressionType::Gzip),
            other => Err(Error::Compression(format!("unknown compression: {other}"))),
        }
    }
}

/// Compress data using the specified algorithm.
pub fn compress(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>, Error> {
    match algorithm {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Zstd => compress_zstd(data),
        CompressionType::Gzip => compress_gzip(data),
    }
}

/// Decompress data using the specified algorithm.
pub fn decompress(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>, Error> {
    match algorithm {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Zstd => decompress_zstd(data),
        CompressionType::Gzip => decompress_gzip(data),
    }
}

fn compress_zstd(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder =
        zstd::Encoder::new(Vec::new(), 3).map_err(|e| Error::Compression(format!("zstd init failed: {e}")))?;
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(format!("zstd write failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(format!("zstd finish failed: {e}")))
}

fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut decoder =
        zstd::Decoder::new(data).map_err(|e| Error::Compression(format!("zstd decoder failed: {e}")))?;
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::Compression(format!("zstd read failed: {e}")))?;
    Ok(output)
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(format!("gzip write failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(format!("gzip finish failed: {e}")))
}

fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::Compression(format!("gzip read failed: {e}")))?;
    Ok(output)
}
