// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Block compression for stream bytes, mirroring the framing
//! `reader::decompress` already reads back: each block is a 3 byte header
//! (length plus an "is original" flag) followed by either the raw or the
//! compressed bytes, whichever is smaller.

use std::io::Write;

use bytes::{BufMut, BytesMut};
use snafu::ResultExt;

use crate::error::{self, OutOfSpecSnafu, Result};
use crate::proto;
use crate::reader::decompress::CompressionType;

impl From<CompressionType> for proto::CompressionKind {
    fn from(value: CompressionType) -> Self {
        match value {
            CompressionType::Zlib => proto::CompressionKind::Zlib,
            CompressionType::Snappy => proto::CompressionKind::Snappy,
            CompressionType::Lzo => proto::CompressionKind::Lzo,
            CompressionType::Lz4 => proto::CompressionKind::Lz4,
            CompressionType::Zstd => proto::CompressionKind::Zstd,
        }
    }
}

/// Identifies a compression configuration well enough to key a [`BufferPool`]
/// by it: two streams compressed the same way can safely share scratch
/// buffers between flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompressionConfig {
    pub kind: CompressionType,
    pub block_size: usize,
}

impl CompressionConfig {
    pub fn new(kind: CompressionType, block_size: usize) -> Self {
        Self { kind, block_size }
    }
}

/// Reusable scratch buffers keyed by [`CompressionConfig`], so that encoding
/// successive stripes under the same compression settings doesn't allocate a
/// fresh `Vec<u8>` per stream per stripe.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: std::collections::HashMap<CompressionConfig, Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a scratch buffer for `config`, reusing a previously released
    /// one if one is available.
    pub fn acquire(&mut self, config: CompressionConfig) -> Vec<u8> {
        self.free
            .get_mut(&config)
            .and_then(|bufs| bufs.pop())
            .unwrap_or_default()
    }

    /// Return a scratch buffer to the pool for reuse under the same config.
    pub fn release(&mut self, config: CompressionConfig, mut buffer: Vec<u8>) {
        buffer.clear();
        self.free.entry(config).or_default().push(buffer);
    }
}

trait CompressorVariant: Send {
    fn compress_block(&self, input: &[u8], scratch: &mut Vec<u8>) -> Result<()>;
}

struct Zlib;
struct Zstd;
struct Snappy;
struct Lz4;

impl CompressorVariant for Zlib {
    fn compress_block(&self, input: &[u8], scratch: &mut Vec<u8>) -> Result<()> {
        scratch.clear();
        let mut encoder =
            flate2::write::DeflateEncoder::new(scratch, flate2::Compression::default());
        encoder.write_all(input).context(error::IoSnafu)?;
        encoder.finish().context(error::IoSnafu)?;
        Ok(())
    }
}

impl CompressorVariant for Zstd {
    fn compress_block(&self, input: &[u8], scratch: &mut Vec<u8>) -> Result<()> {
        let encoded =
            zstd::stream::encode_all(input, 0).context(error::BuildZstdEncoderSnafu)?;
        scratch.clear();
        scratch.extend(encoded);
        Ok(())
    }
}

impl CompressorVariant for Snappy {
    fn compress_block(&self, input: &[u8], scratch: &mut Vec<u8>) -> Result<()> {
        let mut encoder = snap::raw::Encoder::new();
        let encoded = encoder
            .compress_vec(input)
            .context(error::BuildSnappyEncoderSnafu)?;
        scratch.clear();
        scratch.extend(encoded);
        Ok(())
    }
}

impl CompressorVariant for Lz4 {
    fn compress_block(&self, input: &[u8], scratch: &mut Vec<u8>) -> Result<()> {
        let encoded = lz4_flex::block::compress(input);
        scratch.clear();
        scratch.extend(encoded);
        Ok(())
    }
}

fn get_compressor_variant(kind: CompressionType) -> Result<Box<dyn CompressorVariant>> {
    match kind {
        CompressionType::Zlib => Ok(Box::new(Zlib)),
        CompressionType::Snappy => Ok(Box::new(Snappy)),
        CompressionType::Lz4 => Ok(Box::new(Lz4)),
        CompressionType::Zstd => Ok(Box::new(Zstd)),
        // lzokay-native only exposes a decoder; ORC writers commonly treat
        // Lzo as a read-only legacy codec for this reason.
        CompressionType::Lzo => OutOfSpecSnafu {
            msg: "Lzo compression is not supported for writing",
        }
        .fail(),
    }
}

/// Encode and frame one compression block's header. Inverse of
/// `reader::decompress::decode_header`.
fn encode_header(output: &mut BytesMut, length: u32, is_original: bool) {
    let flag = u32::from(is_original);
    let length_and_flag = (length << 1) | flag;
    let bytes = length_and_flag.to_le_bytes();
    output.put_slice(&bytes[..3]);
}

/// Compresses a stream's bytes block by block, picking whichever of the
/// compressed or original bytes is smaller per block, same as every other
/// ORC writer does to avoid expanding incompressible data.
pub struct BlockCompressor {
    config: CompressionConfig,
    variant: Box<dyn CompressorVariant>,
}

impl BlockCompressor {
    pub fn new(config: CompressionConfig) -> Result<Self> {
        let variant = get_compressor_variant(config.kind)?;
        Ok(Self { config, variant })
    }

    pub fn config(&self) -> CompressionConfig {
        self.config
    }

    /// Compress `input` into `output`, using `pool` for scratch space.
    pub fn compress_into(
        &self,
        input: &[u8],
        pool: &mut BufferPool,
        output: &mut BytesMut,
    ) -> Result<()> {
        for chunk in input.chunks(self.config.block_size) {
            let mut scratch = pool.acquire(self.config);
            self.variant.compress_block(chunk, &mut scratch)?;
            if scratch.len() < chunk.len() {
                encode_header(output, scratch.len() as u32, false);
                output.put_slice(&scratch);
            } else {
                encode_header(output, chunk.len() as u32, true);
                output.put_slice(chunk);
            }
            pool.release(self.config, scratch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto;
    use crate::reader::decompress::{Compression, Decompressor};
    use std::io::Read;

    #[test]
    fn zlib_block_round_trips_through_reader_decompressor() {
        let config = CompressionConfig::new(CompressionType::Zlib, 64 * 1024);
        let compressor = BlockCompressor::new(config).unwrap();
        let mut pool = BufferPool::new();
        let mut output = BytesMut::new();
        let input = b"hello hello hello hello hello hello hello world".repeat(100);

        compressor
            .compress_into(&input, &mut pool, &mut output)
            .unwrap();

        let compression =
            Compression::from_proto(proto::CompressionKind::Zlib, Some(64 * 1024)).unwrap();
        let mut decompressor = Decompressor::new(output.freeze(), Some(compression), vec![]);
        let mut decoded = Vec::new();
        decompressor.read_to_end(&mut decoded).unwrap();

        assert_eq!(decoded, input);
    }

    #[test]
    fn incompressible_block_falls_back_to_original() {
        let config = CompressionConfig::new(CompressionType::Snappy, 16);
        let compressor = BlockCompressor::new(config).unwrap();
        let mut pool = BufferPool::new();
        let mut output = BytesMut::new();
        // Random-looking bytes smaller than the block size compress worse
        // than storing them as-is; the header should mark them Original.
        let input = [1u8, 200, 7, 250, 3, 199];

        compressor
            .compress_into(&input, &mut pool, &mut output)
            .unwrap();

        let compression =
            Compression::from_proto(proto::CompressionKind::Snappy, Some(16)).unwrap();
        let mut decompressor = Decompressor::new(output.freeze(), Some(compression), vec![]);
        let mut decoded = Vec::new();
        decompressor.read_to_end(&mut decoded).unwrap();

        assert_eq!(decoded, input);
    }

    #[test]
    fn buffer_pool_reuses_released_buffers() {
        let config = CompressionConfig::new(CompressionType::Lz4, 256 * 1024);
        let mut pool = BufferPool::new();
        let mut buf = pool.acquire(config);
        buf.extend_from_slice(b"scratch");
        pool.release(config, buf);

        let reused = pool.acquire(config);
        assert!(reused.is_empty());
        assert!(reused.capacity() > 0);
    }

    #[test]
    fn lzo_is_rejected_for_writing() {
        let config = CompressionConfig::new(CompressionType::Lzo, 64 * 1024);
        assert!(BlockCompressor::new(config).is_err());
    }
}
