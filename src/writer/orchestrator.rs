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

//! The top-level writer: builds stripes chunk by chunk from incoming pages,
//! decides when to cut a stripe via [`FlushPolicy`], and assembles the file
//! footer on close. Ties together every other `writer` submodule the same
//! way the teacher's `ArrowWriterBuilder`/`ArrowWriter` tie together column
//! writers and stripe buffering, generalized to row groups, dictionary
//! pressure, encryption and the stripe cache.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use bytes::{Bytes, BytesMut};
use prost::Message;
use snafu::prelude::*;

use crate::compression::{BlockCompressor, BufferPool, CompressionConfig};
use crate::encryption::EncryptionInfo;
use crate::error::{
    Result, SchemaMismatchSnafu, ValidationNotEnabledSnafu, WriterClosedSnafu, WriterFailedSnafu,
};
use crate::memory::EstimateMemory;
use crate::reader::ChunkReader;
use crate::schema::{flatten_arrow_schema, FlatNode};
use crate::sink::Sink;

use super::dictionary::{DictionaryOptimizer, DictionaryOptimizerConfig};
use super::flush_policy::{FlushPolicy, FlushPolicyConfig};
use super::footer::{self, ClosedStripe};
use super::stripe::{StripeAssembly, StripeCacheSink};
use super::stripe_cache::{StripeCacheMode, StripeCacheWriter};
use super::validation::{Validation, ValidationBuilder};

/// Matches the row-group size real ORC writers default to (`rowIndexStride`).
const DEFAULT_ROW_GROUP_MAX_ROW_COUNT: u64 = 10_000;

/// Compresses a whole-file section (Metadata or Footer) the same way stream
/// bytes are compressed, but without needing a `StripeAssembly` alive to
/// borrow a `BufferPool` from: these sections are built once, after every
/// stripe is already closed.
fn compress_section(compression: Option<CompressionConfig>, raw: &[u8]) -> Result<Bytes> {
    match compression {
        Some(config) => {
            let compressor = BlockCompressor::new(config)?;
            let mut pool = BufferPool::new();
            let mut out = BytesMut::new();
            compressor.compress_into(raw, &mut pool, &mut out)?;
            Ok(out.freeze())
        }
        None => Ok(Bytes::copy_from_slice(raw)),
    }
}

/// Builds a [`Writer`]. Mirrors the teacher's `ArrowWriterBuilder`: every
/// `with_*` method takes `self` by value and returns it, so configuration
/// reads as a chain ending in [`WriterBuilder::try_build`].
pub struct WriterBuilder {
    schema: SchemaRef,
    compression: Option<CompressionConfig>,
    encryption: Option<Arc<EncryptionInfo>>,
    flush_policy_config: FlushPolicyConfig,
    dictionary_optimizer_config: DictionaryOptimizerConfig,
    row_group_max_row_count: u64,
    stripe_cache: Option<(StripeCacheMode, usize)>,
    user_metadata: HashMap<String, String>,
    validate: bool,
}

impl WriterBuilder {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            compression: None,
            encryption: None,
            flush_policy_config: FlushPolicyConfig::default(),
            dictionary_optimizer_config: DictionaryOptimizerConfig::default(),
            row_group_max_row_count: DEFAULT_ROW_GROUP_MAX_ROW_COUNT,
            stripe_cache: None,
            user_metadata: HashMap::new(),
            validate: false,
        }
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn with_encryption(mut self, encryption: EncryptionInfo) -> Self {
        self.encryption = Some(Arc::new(encryption));
        self
    }

    pub fn with_flush_policy(mut self, config: FlushPolicyConfig) -> Self {
        self.flush_policy_config = config;
        self
    }

    pub fn with_dictionary_optimizer(mut self, config: DictionaryOptimizerConfig) -> Self {
        self.dictionary_optimizer_config = config;
        self
    }

    /// Also used as the Postscript's `row_index_stride`, matching real ORC
    /// writers, which never configure the two independently.
    pub fn with_row_group_max_row_count(mut self, row_group_max_row_count: u64) -> Self {
        self.row_group_max_row_count = row_group_max_row_count;
        self
    }

    /// DWRF only. `max_size` bounds the accumulated cache blob; stripes
    /// beyond that bound are simply not cached (see `StripeCacheWriter`).
    pub fn with_stripe_cache(mut self, mode: StripeCacheMode, max_size: usize) -> Self {
        self.stripe_cache = Some((mode, max_size));
        self
    }

    pub fn with_user_metadata(mut self, key: String, value: String) -> Self {
        self.user_metadata.insert(key, value);
        self
    }

    /// Enables the post-write self-check (`Writer::validate`). Off by
    /// default since it costs a `ValidationBuilder` entry per page/row-group/
    /// stripe.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn try_build<S: Sink>(self, mut sink: S) -> Result<Writer<S>> {
        let nodes = flatten_arrow_schema(&self.schema)?;
        let assembly = StripeAssembly::new(&self.schema, self.compression, self.encryption.clone())?;

        sink.write(vec![Bytes::from_static(footer::MAGIC)])?;

        Ok(Writer {
            sink,
            schema: self.schema,
            nodes,
            compression: self.compression,
            encryption: self.encryption,
            assembly,
            flush_policy: FlushPolicy::new(self.flush_policy_config),
            dictionary_optimizer: DictionaryOptimizer::new(self.dictionary_optimizer_config),
            stripe_cache: self
                .stripe_cache
                .map(|(mode, max_size)| StripeCacheWriter::new(mode, max_size)),
            row_group_max_row_count: self.row_group_max_row_count,
            row_group_row_count: 0,
            closed_stripes: Vec::new(),
            user_metadata: self.user_metadata,
            validation: self.validate.then(ValidationBuilder::new),
            validated: None,
            closed: false,
            poisoned: false,
        })
    }
}

/// Ingests Arrow `RecordBatch` pages and emits a complete ORC/DWRF file to
/// `sink`. Single-threaded and synchronous: every call blocks on whatever
/// `sink`/compression/encryption work it triggers, and there is no
/// cancellation support (`spec.md` §5's concurrency model).
pub struct Writer<S: Sink> {
    sink: S,
    schema: SchemaRef,
    nodes: Vec<FlatNode>,
    compression: Option<CompressionConfig>,
    encryption: Option<Arc<EncryptionInfo>>,
    assembly: StripeAssembly,
    flush_policy: FlushPolicy,
    dictionary_optimizer: DictionaryOptimizer,
    stripe_cache: Option<StripeCacheWriter>,
    row_group_max_row_count: u64,
    row_group_row_count: u64,
    closed_stripes: Vec<ClosedStripe>,
    user_metadata: HashMap<String, String>,
    validation: Option<ValidationBuilder>,
    validated: Option<Validation>,
    closed: bool,
    poisoned: bool,
}

impl<S: Sink> Writer<S> {
    /// Forwards `page`'s rows to the column writers in chunks, cutting a
    /// stripe whenever `flush_policy` says so. A zero-row page is a no-op.
    /// Any error poisons the writer: subsequent `write`/`close` calls fail
    /// without attempting further I/O, since a partially-applied chunk can
    /// leave column writers in a state nothing downstream can safely use.
    pub fn write(&mut self, page: &RecordBatch) -> Result<()> {
        ensure!(!self.closed, WriterClosedSnafu);
        ensure!(!self.poisoned, WriterFailedSnafu);
        ensure!(page.schema() == self.schema, SchemaMismatchSnafu);

        if page.num_rows() == 0 {
            return Ok(());
        }

        let result = self.ingest(page);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    #[tracing::instrument(level = "debug", skip_all, fields(rows = page.num_rows()))]
    fn ingest(&mut self, page: &RecordBatch) -> Result<()> {
        if let Some(validation) = self.validation.as_mut() {
            validation.add_page(page);
        }

        let mut offset = 0usize;
        while offset < page.num_rows() {
            let remaining = page.slice(offset, page.num_rows() - offset);

            // spec.md §4.1's chunk-cap formula: never forward more rows than
            // the flush policy, the current row group, or the current
            // stripe can still take.
            let remaining_row_group = self
                .row_group_max_row_count
                .saturating_sub(self.row_group_row_count);
            let remaining_stripe = self
                .flush_policy
                .stripe_max_row_count()
                .saturating_sub(self.assembly.row_count as u64);
            let chunk_rows = self
                .flush_policy
                .max_chunk_row_count(&remaining)
                .min(remaining_row_group)
                .min(remaining_stripe)
                .max(1)
                .min(remaining.num_rows() as u64) as usize;

            let chunk = remaining.slice(0, chunk_rows);
            self.assembly.encode_batch(&chunk)?;
            self.assembly.optimize_dictionaries(&mut self.dictionary_optimizer);

            self.row_group_row_count += chunk_rows as u64;
            offset += chunk_rows;

            if self.row_group_row_count >= self.row_group_max_row_count {
                let statistics = self.assembly.finish_row_group();
                if let Some(validation) = self.validation.as_mut() {
                    validation.add_row_group_statistics(&statistics);
                }
                tracing::debug!(row_count = self.row_group_row_count, "row group closed");
                self.row_group_row_count = 0;
            }

            let dictionary_full = self.assembly.is_dictionary_full(&self.dictionary_optimizer);
            let should_flush = self
                .flush_policy
                .should_flush(
                    self.assembly.row_count as u64,
                    self.assembly.estimate_memory_size(),
                    dictionary_full,
                )
                .is_some();
            if should_flush {
                self.flush_stripe()?;
            }
        }

        Ok(())
    }

    /// Closes out the stripe currently being buffered and appends it to the
    /// sink. `row_group_row_count` is reset to 0 once this returns, whether
    /// it succeeded or not: either the pending row group made it into the
    /// closed stripe, or the writer is now poisoned and the counter no
    /// longer means anything.
    #[tracing::instrument(level = "debug", skip_all, fields(stripe = self.closed_stripes.len()))]
    fn flush_stripe(&mut self) -> Result<()> {
        struct ResetOnDrop<'a>(&'a mut u64);
        impl Drop for ResetOnDrop<'_> {
            fn drop(&mut self) {
                *self.0 = 0;
            }
        }
        let guard = ResetOnDrop(&mut self.row_group_row_count);
        let pending_row_group = *guard.0 > 0;

        if pending_row_group {
            let statistics = self.assembly.finish_row_group();
            if let Some(validation) = self.validation.as_mut() {
                validation.add_row_group_statistics(&statistics);
            }
        }

        let start_offset = self.sink.size();
        let cache_ref = self
            .stripe_cache
            .as_mut()
            .map(|cache| cache as &mut dyn StripeCacheSink);
        let finished =
            self.assembly
                .finish_stripe(start_offset, &mut self.dictionary_optimizer, cache_ref)?;

        self.sink.write(finished.outputs)?;

        if let Some(validation) = self.validation.as_mut() {
            validation.add_stripe(&finished.information);
            validation.add_stripe_statistics(&finished.statistics);
        }

        tracing::debug!(
            row_count = finished.information.row_count,
            total_bytes = finished.information.total_byte_size(),
            "stripe flushed"
        );

        self.closed_stripes.push(ClosedStripe {
            information: finished.information,
            statistics: finished.statistics,
        });

        Ok(())
    }

    /// Flushes any buffered rows and writes the Metadata section, the
    /// stripe-cache blob (if configured), the footer, the postscript and
    /// its length byte. Idempotent: once closed, further calls are no-ops.
    /// A failure here, like a failed `write`, leaves the writer poisoned;
    /// the partially-written file must be discarded.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.poisoned {
            return WriterFailedSnafu.fail();
        }

        let result = self.finish();
        self.closed = true;
        if result.is_err() {
            self.poisoned = true;
        } else {
            tracing::debug!(written_bytes = self.sink.size(), "writer closed");
        }
        result
    }

    fn finish(&mut self) -> Result<()> {
        if self.assembly.row_count > 0 {
            self.flush_stripe()?;
        }

        let stripe_cache_data = self.stripe_cache.take().map(StripeCacheWriter::finish);
        let stripe_cache_offsets = stripe_cache_data
            .as_ref()
            .map(|data| data.offsets.clone())
            .unwrap_or_default();

        let metadata_section = footer::build_metadata_section(&self.closed_stripes);
        let metadata_bytes = metadata_section.encode_to_vec();
        let metadata_compressed = compress_section(self.compression, &metadata_bytes)?;

        let footer = footer::build_footer(
            &self.nodes,
            &self.closed_stripes,
            &self.user_metadata,
            self.encryption.as_deref(),
            &stripe_cache_offsets,
            Some(self.row_group_max_row_count as u32),
            footer::MAGIC.len() as u64,
        )?;
        let footer_bytes = footer.encode_to_vec();
        let footer_compressed = compress_section(self.compression, &footer_bytes)?;

        let postscript = footer::build_postscript(
            footer_compressed.len() as u64,
            metadata_compressed.len() as u64,
            self.compression,
            stripe_cache_data.as_ref(),
        );
        let postscript_bytes: Bytes = postscript.encode_to_vec().into();
        let postscript_length = postscript_bytes.len() as u8;

        let mut outputs = vec![metadata_compressed];
        if let Some(data) = &stripe_cache_data {
            outputs.push(data.bytes.clone());
        }
        outputs.push(footer_compressed);
        outputs.push(postscript_bytes);
        outputs.push(Bytes::from(vec![postscript_length]));

        self.sink.write(outputs)?;
        self.sink.close()?;

        if let Some(mut builder) = self.validation.take() {
            let merged = footer::merge_file_statistics(&self.closed_stripes, self.nodes.len());
            builder.set_file_statistics(merged);
            builder.set_compression(self.compression);
            builder.set_row_group_max_row_count(self.row_group_max_row_count);
            builder.set_orc_types(footer::build_type_tree(&self.nodes)?);
            builder.set_flattened_nodes(self.nodes.clone());
            builder.set_column_names(
                self.schema.fields().iter().map(|f| f.name().clone()).collect(),
            );
            builder.set_version(vec![0, 12]);
            for (key, value) in &self.user_metadata {
                builder.add_metadata_property(key.clone(), value.clone());
            }
            self.validated = Some(builder.build());
        }

        Ok(())
    }

    /// Total bytes appended to the sink so far, including the header and,
    /// after `close`, the full file tail.
    pub fn written_bytes(&self) -> u64 {
        self.sink.size()
    }

    /// Estimated memory currently buffered for the stripe in progress, not
    /// yet reflected in `written_bytes`.
    pub fn buffered_bytes(&self) -> usize {
        self.assembly.estimate_memory_size()
    }

    /// `buffered_bytes` plus memory the sink itself retains outside of
    /// `written_bytes` (e.g. internal buffering).
    pub fn retained_bytes(&self) -> usize {
        self.assembly.estimate_memory_size() + self.sink.retained_size() as usize
    }

    /// Reads `source`'s file-tail metadata back and checks it against what
    /// was recorded while writing. Only meaningful after `close`, and only
    /// if the writer was built with `WriterBuilder::with_validation(true)`.
    pub fn validate<R: ChunkReader>(&self, source: &mut R) -> Result<()> {
        self.validated
            .as_ref()
            .context(ValidationNotEnabledSnafu)?
            .check(source)
    }

    /// Borrows the sink, e.g. to read back a still-owned in-memory buffer
    /// without giving up the writer.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Unwraps the sink, typically to read back what was written (e.g. in
    /// tests, or to hand a `Vec<u8>`/`File` sink off to something else).
    pub fn into_inner(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{DataType as ArrowDataType, Field, Schema};
    use bytes::Bytes;

    use super::*;
    use crate::reader::metadata::read_metadata;
    use crate::sink::IoSink;

    fn test_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", ArrowDataType::Int32, false),
            Field::new("name", ArrowDataType::Utf8, true),
        ]))
    }

    fn test_batch(schema: &SchemaRef, ids: Vec<i32>) -> RecordBatch {
        let names: Vec<Option<String>> = ids.iter().map(|i| Some(format!("row-{i}"))).collect();
        RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    fn into_bytes(writer: Writer<IoSink<Vec<u8>>>) -> Bytes {
        Bytes::from(writer.into_inner().into_inner())
    }

    #[test]
    fn roundtrip_single_stripe_reads_back_expected_row_count() {
        let schema = test_schema();
        let mut writer = WriterBuilder::new(schema.clone())
            .try_build(IoSink::new(Vec::new()))
            .unwrap();

        writer.write(&test_batch(&schema, (0..100).collect())).unwrap();
        writer.close().unwrap();

        let mut bytes = into_bytes(writer);
        let metadata = read_metadata(&mut bytes).unwrap();
        assert_eq!(metadata.number_of_rows(), 100);
        assert_eq!(metadata.stripe_metadatas().len(), 1);
    }

    #[test]
    fn close_with_no_rows_produces_a_valid_empty_file() {
        let schema = test_schema();
        let mut writer = WriterBuilder::new(schema)
            .try_build(IoSink::new(Vec::new()))
            .unwrap();
        writer.close().unwrap();

        let mut bytes = into_bytes(writer);
        let metadata = read_metadata(&mut bytes).unwrap();
        assert_eq!(metadata.number_of_rows(), 0);
        assert_eq!(metadata.stripe_metadatas().len(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let schema = test_schema();
        let mut writer = WriterBuilder::new(schema.clone())
            .try_build(IoSink::new(Vec::new()))
            .unwrap();
        writer.write(&test_batch(&schema, vec![1, 2, 3])).unwrap();
        writer.close().unwrap();
        let written_after_first_close = writer.written_bytes();

        writer.close().unwrap();
        assert_eq!(writer.written_bytes(), written_after_first_close);
    }

    #[test]
    fn small_row_group_cap_splits_a_page_into_multiple_row_groups_and_reads_back_cleanly() {
        let schema = test_schema();
        let mut writer = WriterBuilder::new(schema.clone())
            .with_row_group_max_row_count(10)
            .try_build(IoSink::new(Vec::new()))
            .unwrap();

        writer.write(&test_batch(&schema, (0..35).collect())).unwrap();
        writer.close().unwrap();

        let mut bytes = into_bytes(writer);
        let metadata = read_metadata(&mut bytes).unwrap();
        assert_eq!(metadata.number_of_rows(), 35);
    }

    #[test]
    fn validate_accepts_a_correctly_written_file() {
        let schema = test_schema();
        let mut writer = WriterBuilder::new(schema.clone())
            .with_validation(true)
            .try_build(IoSink::new(Vec::new()))
            .unwrap();
        writer.write(&test_batch(&schema, (0..50).collect())).unwrap();
        writer.close().unwrap();

        let mut bytes = Bytes::from(writer.sink().get_ref().clone());
        writer.validate(&mut bytes).unwrap();
    }

    #[test]
    fn rejects_a_page_with_a_mismatched_schema() {
        let schema = test_schema();
        let mut writer = WriterBuilder::new(schema)
            .try_build(IoSink::new(Vec::new()))
            .unwrap();

        let other_schema = Arc::new(Schema::new(vec![Field::new(
            "other",
            ArrowDataType::Int64,
            false,
        )]));
        let batch = RecordBatch::try_new(
            other_schema.clone(),
            vec![Arc::new(arrow::array::Int64Array::from(vec![1, 2, 3]))],
        )
        .unwrap();

        assert!(writer.write(&batch).is_err());
    }

    #[test]
    fn write_after_close_is_rejected() {
        let schema = test_schema();
        let mut writer = WriterBuilder::new(schema.clone())
            .try_build(IoSink::new(Vec::new()))
            .unwrap();
        writer.close().unwrap();

        assert!(writer.write(&test_batch(&schema, vec![1])).is_err());
    }
}
