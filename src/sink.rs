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

//! The append-only byte sink the writer emits stripes and the file footer
//! to. See `spec.md` §6's "Sink contract".

use bytes::Bytes;
use snafu::ResultExt;
use std::io::Write;

use crate::error::{IoSnafu, Result};

/// Append-only destination for encoded ORC/DWRF bytes. No seek: the
/// orchestrator tracks file offsets itself (via [`Sink::size`]) rather than
/// relying on the sink to support random access.
pub trait Sink {
    /// Total bytes appended so far.
    fn size(&self) -> u64;

    /// Append every output in `outputs`, in order, as one logical write.
    /// Used so a stripe's index streams, data streams and footer reach the
    /// sink as a single call instead of one `write_all` per stream.
    fn write(&mut self, outputs: Vec<Bytes>) -> Result<()>;

    /// Flush and release the underlying resource. The orchestrator calls
    /// this exactly once, from `Writer::close`.
    fn close(&mut self) -> Result<()>;

    /// Memory retained by the sink that isn't reflected in `size` yet (most
    /// sinks buffer nothing extra and can leave this at the default).
    fn retained_size(&self) -> u64 {
        0
    }
}

/// Adapts any [`std::io::Write`] into a [`Sink`], tracking the running
/// offset manually the same way the teacher's `ArrowWriter` already does
/// with its `total_bytes_written` field — this is that pattern promoted
/// into a reusable type. Covers both file output (`File`) and in-memory
/// output (`Vec<u8>`, `Cursor<Vec<u8>>`) with a single implementation.
pub struct IoSink<W> {
    inner: W,
    written: u64,
}

impl<W: Write> IoSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Consume the sink, returning the wrapped writer. Typically called
    /// after `Sink::close` to inspect or hand off the underlying buffer
    /// (e.g. read back a `Vec<u8>` in tests).
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Borrow the wrapped writer without consuming the sink, e.g. to read
    /// back a `Vec<u8>` buffer's contents while the sink (and whatever owns
    /// it) is still alive.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: Write> Sink for IoSink<W> {
    fn size(&self) -> u64 {
        self.written
    }

    fn write(&mut self, outputs: Vec<Bytes>) -> Result<()> {
        for bytes in outputs {
            self.inner.write_all(&bytes).context(IoSnafu)?;
            self.written += bytes.len() as u64;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.flush().context(IoSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_size_across_writes() {
        let mut sink = IoSink::new(Vec::new());
        sink.write(vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")])
            .unwrap();
        assert_eq!(sink.size(), 5);
        sink.write(vec![Bytes::from_static(b"f")]).unwrap();
        assert_eq!(sink.size(), 6);
        sink.close().unwrap();
        assert_eq!(sink.into_inner(), b"abcdef");
    }
}
