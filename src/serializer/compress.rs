//! Flag-byte framed deflate for compressed job bodies.
//!
//! The first byte says whether the rest is deflated (`1`) or stored as is
//! (`0`). Bodies under the threshold are not worth compressing.

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{Read, Write};

use crate::error::{QueueError, Result};

const RAW: u8 = 0;
const DEFLATED: u8 = 1;

/// Default size in bytes at which bodies get deflated.
pub const DEFAULT_THRESHOLD: usize = 1024;

pub fn pack(body: &[u8], threshold: usize) -> Result<Vec<u8>> {
    if body.len() < threshold {
        let mut framed = Vec::with_capacity(body.len() + 1);
        framed.push(RAW);
        framed.extend_from_slice(body);
        return Ok(framed);
    }

    let mut encoder = DeflateEncoder::new(vec![DEFLATED], Compression::default());
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

pub fn unpack(framed: &[u8]) -> Result<Vec<u8>> {
    match framed.split_first() {
        Some((&RAW, rest)) => Ok(rest.to_vec()),
        Some((&DEFLATED, rest)) => {
            let mut body = Vec::new();
            DeflateDecoder::new(rest)
                .read_to_end(&mut body)
                .map_err(|e| QueueError::serialization(format!("corrupt deflate body: {}", e)))?;
            Ok(body)
        }
        Some((flag, _)) => Err(QueueError::serialization(format!(
            "unknown compression flag {}",
            flag
        ))),
        None => Err(QueueError::serialization("empty compressed body")),
    }
}
