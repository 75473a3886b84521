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

//! Decides when the orchestrator must cut a stripe, and how many rows of
//! an incoming page may be forwarded to column writers in one chunk.

use arrow::array::RecordBatch;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlushReason {
    MaxRows,
    MaxBytes,
    DictionaryFull,
    Closed,
}

#[derive(Debug, Clone)]
pub struct FlushPolicyConfig {
    pub stripe_min_bytes: usize,
    pub stripe_max_bytes: usize,
    pub stripe_max_row_count: u64,
}

impl Default for FlushPolicyConfig {
    fn default() -> Self {
        // Matches the teacher's `ArrowWriter` defaults in `arrow_writer.rs`
        // (64MiB stripes, no explicit row cap beyond i64::MAX).
        Self {
            stripe_min_bytes: 16 * 1024 * 1024,
            stripe_max_bytes: 64 * 1024 * 1024,
            stripe_max_row_count: u64::MAX,
        }
    }
}

pub struct FlushPolicy {
    config: FlushPolicyConfig,
}

impl FlushPolicy {
    pub fn new(config: FlushPolicyConfig) -> Self {
        Self { config }
    }

    /// Per-batch sub-slicing hint: never forward more rows from `page` in
    /// one chunk than could plausibly need a flush decision afterwards. A
    /// conservative default slices by the configured row cap; this keeps
    /// the ingest loop's `min(...)` in `spec.md` §4.1 well-defined even for
    /// very large incoming batches.
    pub fn max_chunk_row_count(&self, page: &RecordBatch) -> u64 {
        (page.num_rows() as u64).min(self.config.stripe_max_row_count.max(1))
    }

    /// The configured per-stripe row cap, needed directly by the
    /// orchestrator's ingest-loop chunk-cap formula alongside
    /// `max_chunk_row_count`.
    pub fn stripe_max_row_count(&self) -> u64 {
        self.config.stripe_max_row_count
    }

    /// Decide whether the stripe currently being built must be cut.
    /// `dictionary_full` should come from `DictionaryOptimizer::is_full`.
    pub fn should_flush(
        &self,
        stripe_row_count: u64,
        buffered_bytes: usize,
        dictionary_full: bool,
    ) -> Option<FlushReason> {
        if stripe_row_count >= self.config.stripe_max_row_count {
            return Some(FlushReason::MaxRows);
        }
        if buffered_bytes >= self.config.stripe_max_bytes {
            return Some(FlushReason::MaxBytes);
        }
        if dictionary_full && buffered_bytes >= self.config.stripe_min_bytes {
            return Some(FlushReason::DictionaryFull);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FlushPolicyConfig {
        FlushPolicyConfig {
            stripe_min_bytes: 100,
            stripe_max_bytes: 1000,
            stripe_max_row_count: 10,
        }
    }

    #[test]
    fn flushes_on_max_rows() {
        let policy = FlushPolicy::new(config());
        assert_eq!(policy.should_flush(10, 0, false), Some(FlushReason::MaxRows));
        assert_eq!(policy.should_flush(9, 0, false), None);
    }

    #[test]
    fn flushes_on_max_bytes() {
        let policy = FlushPolicy::new(config());
        assert_eq!(
            policy.should_flush(0, 1000, false),
            Some(FlushReason::MaxBytes)
        );
    }

    #[test]
    fn dictionary_full_only_flushes_once_min_bytes_reached() {
        let policy = FlushPolicy::new(config());
        assert_eq!(policy.should_flush(0, 50, true), None);
        assert_eq!(
            policy.should_flush(0, 100, true),
            Some(FlushReason::DictionaryFull)
        );
    }
}
