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

//! Monitors aggregate dictionary memory across a stripe's dictionary-capable
//! column writers and converts weak dictionaries to direct encoding under
//! memory or efficacy pressure.

use super::column::DictionaryColumnWriter;

/// Ratio below which a dictionary is considered to be pulling its weight.
/// Above this, dictionary-encoded size is close enough to (or worse than)
/// direct-encoded size that the dictionary isn't earning its keep.
const USEFUL_RATIO_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct DictionaryOptimizerConfig {
    /// Aggregate dictionary memory, in bytes, above which conversions start
    /// being considered even outside the almost-full band.
    pub dictionary_max_memory: usize,
    /// Width of the "almost full" band below `dictionary_max_memory`; once
    /// aggregate dictionary memory enters this band, `isFull` reports true.
    pub dictionary_memory_almost_full_range: usize,
    /// Minimum per-column dictionary byte size before a column is even
    /// considered for a usefulness check; small dictionaries are cheap
    /// enough that the bookkeeping isn't worth it.
    pub dictionary_useful_check_column_size: usize,
    /// Re-evaluate `optimize` only every N chunks, to keep per-chunk
    /// overhead low when there's no memory pressure.
    pub dictionary_useful_check_per_chunk_frequency: usize,
    /// Row count above which `optimize` starts evaluating even if the soft
    /// memory limit hasn't been crossed yet.
    pub stripe_row_count_soft_threshold: u64,
}

impl Default for DictionaryOptimizerConfig {
    fn default() -> Self {
        Self {
            dictionary_max_memory: 16 * 1024 * 1024,
            dictionary_memory_almost_full_range: 2 * 1024 * 1024,
            dictionary_useful_check_column_size: 64 * 1024,
            dictionary_useful_check_per_chunk_frequency: 1,
            stripe_row_count_soft_threshold: 100_000,
        }
    }
}

/// Owns no column writers itself; `optimize`/`final_optimize` are handed a
/// fresh `&mut [&mut dyn DictionaryColumnWriter]` each call, collected by the
/// caller (the orchestrator) by walking the column tree via
/// `nested_column_writers` immediately before the call. This keeps the
/// optimizer itself free of any column-tree-shaped state.
pub struct DictionaryOptimizer {
    config: DictionaryOptimizerConfig,
    chunks_since_check: usize,
    conversions_this_stripe: usize,
}

impl DictionaryOptimizer {
    pub fn new(config: DictionaryOptimizerConfig) -> Self {
        Self {
            config,
            chunks_since_check: 0,
            conversions_this_stripe: 0,
        }
    }

    fn aggregate_dictionary_bytes(writers: &[&mut dyn DictionaryColumnWriter]) -> usize {
        writers.iter().map(|w| w.dictionary_memory_bytes()).sum()
    }

    /// Per-chunk evaluation point, called after every chunk of rows is
    /// forwarded to the column writers (`spec.md` §4.3's ingest loop).
    pub fn optimize(&mut self, writers: &mut [&mut dyn DictionaryColumnWriter], stripe_row_count: u64) {
        self.chunks_since_check += 1;
        if self.chunks_since_check < self.config.dictionary_useful_check_per_chunk_frequency {
            return;
        }
        self.chunks_since_check = 0;

        let aggregate = Self::aggregate_dictionary_bytes(writers);
        let soft_limit = self
            .config
            .dictionary_max_memory
            .saturating_sub(self.config.dictionary_memory_almost_full_range);
        if aggregate < soft_limit && stripe_row_count < self.config.stripe_row_count_soft_threshold {
            return;
        }

        let before = self.conversions_this_stripe;
        self.convert_weak_dictionaries(writers, true);
        if self.conversions_this_stripe > before {
            tracing::debug!(
                converted = self.conversions_this_stripe - before,
                aggregate_bytes = aggregate,
                "dictionary columns converted to direct encoding"
            );
        }
    }

    /// Invoked once at stripe close (`spec.md` §4.3 step 1), evaluating
    /// every remaining dictionary column regardless of memory pressure so
    /// that weakly-useful dictionaries never make it into the written
    /// stripe.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn final_optimize(&mut self, writers: &mut [&mut dyn DictionaryColumnWriter]) {
        let before = self.conversions_this_stripe;
        self.convert_weak_dictionaries(writers, false);
        tracing::debug!(converted = self.conversions_this_stripe - before, "final dictionary optimize");
    }

    fn convert_weak_dictionaries(
        &mut self,
        writers: &mut [&mut dyn DictionaryColumnWriter],
        respect_memory_guard: bool,
    ) {
        loop {
            let candidate = writers
                .iter_mut()
                .filter(|w| w.dictionary_memory_bytes() >= self.config.dictionary_useful_check_column_size)
                .find(|w| w.estimate_dictionary_ratio() >= USEFUL_RATIO_THRESHOLD);

            match candidate {
                Some(writer) => {
                    writer.convert_to_direct();
                    self.conversions_this_stripe += 1;
                }
                None => break,
            }

            if respect_memory_guard && Self::aggregate_dictionary_bytes(writers) < self.config.dictionary_max_memory {
                break;
            }
        }
    }

    /// True iff aggregate dictionary memory is within the almost-full band;
    /// consulted by the flush policy so a stripe can be cut on dictionary
    /// pressure even when row/byte thresholds haven't been hit.
    pub fn is_full(&self, writers: &[&mut dyn DictionaryColumnWriter]) -> bool {
        let aggregate = Self::aggregate_dictionary_bytes(writers);
        let almost_full_start = self
            .config
            .dictionary_max_memory
            .saturating_sub(self.config.dictionary_memory_almost_full_range);
        aggregate >= almost_full_start
    }

    /// Number of columns converted to direct encoding so far this stripe;
    /// exposed for tests asserting scenario 4's "at least one conversion"
    /// expectation.
    pub fn conversions_this_stripe(&self) -> usize {
        self.conversions_this_stripe
    }

    pub fn reset(&mut self) {
        self.chunks_since_check = 0;
        self.conversions_this_stripe = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::column::{ColumnWriter, StringColumnWriter};
    use arrow::array::{ArrayRef, StringArray};
    use std::sync::Arc;

    fn config_with_tiny_budget() -> DictionaryOptimizerConfig {
        DictionaryOptimizerConfig {
            dictionary_max_memory: 16,
            dictionary_memory_almost_full_range: 4,
            dictionary_useful_check_column_size: 0,
            dictionary_useful_check_per_chunk_frequency: 1,
            stripe_row_count_soft_threshold: 0,
        }
    }

    #[test]
    fn optimize_converts_once_dictionary_ratio_is_weak() {
        let mut writer = StringColumnWriter::new(1);
        // High-cardinality, all-distinct values: dictionary buys nothing.
        let values: Vec<String> = (0..64).map(|i| format!("row-{i}-unique-value")).collect();
        let array: ArrayRef = Arc::new(StringArray::from(values));
        writer.write_block(&array).unwrap();

        let mut optimizer = DictionaryOptimizer::new(config_with_tiny_budget());
        let mut writers: Vec<&mut dyn DictionaryColumnWriter> = vec![&mut writer];
        optimizer.optimize(&mut writers, 64);

        assert_eq!(optimizer.conversions_this_stripe(), 1);
        assert_eq!(writer.dictionary_memory_bytes(), 0);
    }

    #[test]
    fn final_optimize_ignores_memory_guard() {
        let mut writer = StringColumnWriter::new(1);
        let values: Vec<String> = (0..8).map(|i| format!("distinct-{i}")).collect();
        let array: ArrayRef = Arc::new(StringArray::from(values));
        writer.write_block(&array).unwrap();

        // A generous budget that `optimize` wouldn't trip, but
        // `final_optimize` still evaluates usefulness unconditionally.
        let config = DictionaryOptimizerConfig {
            dictionary_max_memory: usize::MAX,
            ..config_with_tiny_budget()
        };
        let mut optimizer = DictionaryOptimizer::new(config);
        let mut writers: Vec<&mut dyn DictionaryColumnWriter> = vec![&mut writer];
        optimizer.final_optimize(&mut writers);

        assert_eq!(optimizer.conversions_this_stripe(), 1);
    }

    #[test]
    fn is_full_reports_true_within_almost_full_band() {
        let mut writer = StringColumnWriter::new(1);
        let values: Vec<String> = (0..16).map(|i| format!("distinct-value-{i}")).collect();
        let array: ArrayRef = Arc::new(StringArray::from(values));
        writer.write_block(&array).unwrap();

        let optimizer = DictionaryOptimizer::new(config_with_tiny_budget());
        let mut writers: Vec<&mut dyn DictionaryColumnWriter> = vec![&mut writer];
        assert!(optimizer.is_full(&mut writers));
    }
}
