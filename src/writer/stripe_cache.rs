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

//! DWRF-only: accumulates a copy of every stripe's index and/or footer bytes
//! into one contiguous blob written just before the file footer, so a
//! reader can open the file with a single tail read plus one read of this
//! blob instead of re-fetching every stripe's index/footer individually.

use bytes::{BufMut, Bytes, BytesMut};

use super::stripe::StripeCacheSink;
use crate::proto;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StripeCacheMode {
    Index,
    Footer,
    Both,
    None,
}

impl From<StripeCacheMode> for proto::dwrf_stripe_cache::Mode {
    fn from(value: StripeCacheMode) -> Self {
        match value {
            StripeCacheMode::Index => proto::dwrf_stripe_cache::Mode::Index,
            StripeCacheMode::Footer => proto::dwrf_stripe_cache::Mode::Footer,
            StripeCacheMode::Both => proto::dwrf_stripe_cache::Mode::Both,
            StripeCacheMode::None => proto::dwrf_stripe_cache::Mode::None,
        }
    }
}

/// The finished, immutable cache blob plus its per-stripe offsets, as handed
/// to file finalization (`writer/footer.rs`).
pub struct DwrfStripeCacheData {
    pub mode: StripeCacheMode,
    pub bytes: Bytes,
    /// One entry per contributing stripe, plus a terminating entry equal to
    /// `bytes.len()` (`spec.md` §4.6's invariant).
    pub offsets: Vec<u64>,
}

/// Holds either nothing, index streams, footer bytes, or both, depending on
/// `mode`, plus the running offsets vector recording where each stripe's
/// cached region begins. Once `max_size` would be exceeded the cache stops
/// accumulating further stripes rather than growing unboundedly; a reader
/// that finds fewer offsets than stripes simply falls back to reading that
/// stripe's index/footer from its normal on-disk location.
pub struct StripeCacheWriter {
    mode: StripeCacheMode,
    max_size: usize,
    buffer: BytesMut,
    offsets: Vec<u64>,
    stopped: bool,
}

impl StripeCacheWriter {
    pub fn new(mode: StripeCacheMode, max_size: usize) -> Self {
        Self {
            mode,
            max_size,
            buffer: BytesMut::new(),
            offsets: Vec::new(),
            stopped: false,
        }
    }

    fn wants_index(&self) -> bool {
        matches!(self.mode, StripeCacheMode::Index | StripeCacheMode::Both)
    }

    fn wants_footer(&self) -> bool {
        matches!(self.mode, StripeCacheMode::Footer | StripeCacheMode::Both)
    }

    fn append(&mut self, bytes: &[u8]) {
        if self.stopped || self.mode == StripeCacheMode::None {
            return;
        }
        if self.buffer.len() + bytes.len() > self.max_size {
            self.stopped = true;
            return;
        }
        self.buffer.put_slice(bytes);
    }

    /// Seals the cache, returning the concatenated bytes and final offsets
    /// vector (including the terminating entry).
    pub fn finish(mut self) -> DwrfStripeCacheData {
        self.offsets.push(self.buffer.len() as u64);
        DwrfStripeCacheData {
            mode: self.mode,
            bytes: self.buffer.freeze(),
            offsets: self.offsets,
        }
    }
}

impl StripeCacheSink for StripeCacheWriter {
    fn begin_stripe(&mut self) {
        if self.mode == StripeCacheMode::None || self.stopped {
            return;
        }
        self.offsets.push(self.buffer.len() as u64);
    }

    fn record_index_streams(&mut self, streams: &[Bytes]) {
        if !self.wants_index() {
            return;
        }
        for stream in streams {
            self.append(stream);
        }
    }

    fn record_stripe_footer(&mut self, footer: &Bytes) {
        if !self.wants_footer() {
            return;
        }
        self.append(footer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_mode_accumulates_index_and_footer_bytes_with_one_offset_per_stripe() {
        let mut cache = StripeCacheWriter::new(StripeCacheMode::Both, 1024);

        cache.begin_stripe();
        cache.record_index_streams(&[Bytes::from_static(b"idx1")]);
        cache.record_stripe_footer(&Bytes::from_static(b"foot1"));

        cache.begin_stripe();
        cache.record_index_streams(&[Bytes::from_static(b"idx2")]);
        cache.record_stripe_footer(&Bytes::from_static(b"foot2"));

        let data = cache.finish();
        assert_eq!(&data.bytes[..], b"idx1foot1idx2foot2");
        // Two stripes contributed, plus one terminator.
        assert_eq!(data.offsets, vec![0, 9, 18]);
    }

    #[test]
    fn footer_only_mode_ignores_index_streams() {
        let mut cache = StripeCacheWriter::new(StripeCacheMode::Footer, 1024);
        cache.begin_stripe();
        cache.record_index_streams(&[Bytes::from_static(b"idx1")]);
        cache.record_stripe_footer(&Bytes::from_static(b"foot1"));

        let data = cache.finish();
        assert_eq!(&data.bytes[..], b"foot1");
    }

    #[test]
    fn stops_accumulating_once_max_size_would_be_exceeded() {
        let mut cache = StripeCacheWriter::new(StripeCacheMode::Index, 6);
        cache.begin_stripe();
        cache.record_index_streams(&[Bytes::from_static(b"abcdef")]);
        cache.begin_stripe();
        cache.record_index_streams(&[Bytes::from_static(b"ghijkl")]);

        let data = cache.finish();
        assert_eq!(&data.bytes[..], b"abcdef");
    }

    #[test]
    fn none_mode_produces_an_empty_blob() {
        let mut cache = StripeCacheWriter::new(StripeCacheMode::None, 1024);
        cache.begin_stripe();
        cache.record_index_streams(&[Bytes::from_static(b"idx1")]);
        cache.record_stripe_footer(&Bytes::from_static(b"foot1"));

        let data = cache.finish();
        assert!(data.bytes.is_empty());
        assert_eq!(data.offsets, vec![0]);
    }
}
