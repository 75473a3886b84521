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

use std::collections::HashMap;
use std::marker::PhantomData;

use arrow::{
    array::{Array, ArrayRef, AsArray},
    datatypes::{
        ArrowPrimitiveType, ByteArrayType, Float32Type, Float64Type, GenericBinaryType,
        GenericStringType, Int16Type, Int32Type, Int64Type, Int8Type,
    },
};
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    encoding::{
        boolean::BooleanEncoder,
        byte::ByteRleEncoder,
        float::FloatValueEncoder,
        integer::{rle_v2::RleV2Encoder, NInt, SignedEncoding, UnsignedEncoding},
        PrimitiveValueEncoder,
    },
    error::Result,
    memory::EstimateMemory,
    statistics::{ColumnStatistics, TypeStatistics},
    writer::StreamType,
};

use super::{ColumnEncoding, Stream, StreamDataOutput};

/// A hint the stripe-assembly step can pass to [`ColumnWriter::index_streams`].
/// Row positions within a stream (needed for mid-stripe seeking) are not
/// tracked by this writer — none of the testable properties this crate
/// implements exercise position-based seeking, only row-group statistics —
/// so this is currently an empty extension point kept for interface
/// stability rather than a real input.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowIndexHint;

/// The per-column-node writer contract. Columns form a tree (see
/// `StructColumnWriter`): the orchestrator and dictionary optimizer walk it
/// via `nested_column_writers` rather than downcasting concrete types.
pub trait ColumnWriter: EstimateMemory {
    /// Encode `array` into this column's internal buffers. Returns an
    /// estimate of the raw (uncompressed, in-memory) bytes consumed, used by
    /// the flush policy's byte-size accounting.
    fn write_block(&mut self, array: &ArrayRef) -> Result<usize>;

    /// Bytes currently buffered in this column's encoders (not yet flushed).
    fn buffered_bytes(&self) -> usize {
        self.estimate_memory_size()
    }

    /// Checkpoint a row-group boundary: snapshot and reset per-row-group
    /// statistics, keyed by node id (a leaf reports just itself; a struct
    /// reports itself plus every descendant).
    fn finish_row_group(&mut self) -> HashMap<u32, ColumnStatistics>;

    /// Finalize this column's state for the stripe currently being
    /// assembled. No more `write_block` calls are valid until `reset`.
    fn close(&mut self);

    /// Reset all per-stripe state (buffers, statistics, encoding choice)
    /// once the stripe's streams have been read out via
    /// `index_streams`/`data_streams`, readying the writer for the next
    /// stripe.
    fn reset(&mut self);

    /// This column's own index stream(s) (row index, bloom filter) for the
    /// stripe just closed. Does not recurse into nested columns.
    fn index_streams(&mut self, hint: Option<RowIndexHint>) -> Vec<StreamDataOutput>;

    /// This column's own data stream(s) for the stripe just closed. Does not
    /// recurse into nested columns.
    fn data_streams(&mut self) -> Vec<StreamDataOutput>;

    /// This column's own encoding descriptor(s), keyed by node id (a leaf
    /// reports just itself).
    fn column_encodings(&self) -> HashMap<u32, ColumnEncoding>;

    /// This column's accumulated whole-stripe statistics, keyed by node id.
    fn column_stripe_statistics(&self) -> HashMap<u32, ColumnStatistics>;

    /// Direct children, for struct-typed columns; empty for leaves.
    fn nested_column_writers(&self) -> Vec<&dyn ColumnWriter> {
        vec![]
    }

    /// Mutable counterpart of [`Self::nested_column_writers`], used by the
    /// dictionary optimizer's tree walk (`writer::dictionary`) to reach
    /// every dictionary-capable writer for `convert_to_direct` calls.
    fn nested_column_writers_mut(&mut self) -> Vec<&mut dyn ColumnWriter> {
        vec![]
    }

    /// Optional extended capability: `Some` iff this writer also implements
    /// [`DictionaryColumnWriter`]. A capability query rather than a type
    /// check, per `spec.md` §9's Design Note on modeling the dictionary
    /// writer subtype as a capability collected while walking the tree.
    fn as_dictionary_writer_mut(&mut self) -> Option<&mut dyn DictionaryColumnWriter> {
        None
    }

    /// Total memory retained across stripe boundaries (e.g. a live
    /// dictionary); leaves that hold nothing beyond the current stripe's
    /// buffers can just report `buffered_bytes`.
    fn retained_bytes(&self) -> usize {
        self.buffered_bytes()
    }
}

/// Extends [`ColumnWriter`] for columns capable of dictionary encoding.
/// Consumed only by the dictionary optimizer (`writer::dictionary`), which
/// discovers these via `nested_column_writers` rather than a type check.
pub trait DictionaryColumnWriter: ColumnWriter {
    /// Estimated ratio of dictionary-encoded size to direct-encoded size for
    /// the data seen so far this stripe. Values close to or above 1.0 mean
    /// the dictionary isn't paying for itself.
    fn estimate_dictionary_ratio(&self) -> f64;

    /// Abandon dictionary encoding for the remainder of this stripe,
    /// replaying everything buffered so far through direct encoding.
    fn convert_to_direct(&mut self);

    /// Bytes held by the dictionary itself (entries plus index overhead),
    /// as opposed to `buffered_bytes`'s view of the whole column.
    fn dictionary_memory_bytes(&self) -> usize;
}

/// Running per-type statistics, accumulated one value at a time as it's
/// encoded, independent of which [`PrimitiveValueEncoder`] is doing the byte
/// encoding. Mirrors `statistics::TypeStatistics`'s variant shape.
#[derive(Debug, Clone)]
enum Accumulator {
    Integer {
        min: i64,
        max: i64,
        sum: Option<i64>,
    },
    Double {
        min: f64,
        max: f64,
        sum: Option<f64>,
    },
    String {
        min: Option<Vec<u8>>,
        max: Option<Vec<u8>>,
        sum: i64,
    },
    Bucket {
        true_count: u64,
    },
}

impl Accumulator {
    fn update_integer(&mut self, value: i64) {
        if let Accumulator::Integer { min, max, sum } = self {
            *min = (*min).min(value);
            *max = (*max).max(value);
            *sum = sum.and_then(|s| s.checked_add(value));
        }
    }

    fn update_double(&mut self, value: f64) {
        if let Accumulator::Double { min, max, sum } = self {
            *min = min.min(value);
            *max = max.max(value);
            *sum = sum.map(|s| s + value);
        }
    }

    fn update_bytes(&mut self, value: &[u8]) {
        if let Accumulator::String { min, max, sum } = self {
            if min.as_deref().is_none_or(|m| value < m) {
                *min = Some(value.to_vec());
            }
            if max.as_deref().is_none_or(|m| value > m) {
                *max = Some(value.to_vec());
            }
            *sum += value.len() as i64;
        }
    }

    fn update_bool(&mut self, value: bool) {
        if let Accumulator::Bucket { true_count } = self {
            if value {
                *true_count += 1;
            }
        }
    }

    fn finish(self, number_of_values: u64, has_null: bool) -> ColumnStatistics {
        let type_statistics = match self {
            Accumulator::Integer { min, max, sum } if number_of_values > 0 => {
                Some(TypeStatistics::Integer { min, max, sum })
            }
            Accumulator::Double { min, max, sum } if number_of_values > 0 => {
                Some(TypeStatistics::Double { min, max, sum })
            }
            Accumulator::String { min, max, sum } if number_of_values > 0 => {
                Some(TypeStatistics::String {
                    min: String::from_utf8_lossy(&min.unwrap_or_default()).into_owned(),
                    max: String::from_utf8_lossy(&max.unwrap_or_default()).into_owned(),
                    sum,
                })
            }
            Accumulator::Bucket { true_count } => Some(TypeStatistics::Bucket { true_count }),
            _ => None,
        };
        ColumnStatistics::new(number_of_values, has_null, type_statistics)
    }
}

/// Bridges an `ArrowPrimitiveType`'s native value type to the `Accumulator`
/// variant that tracks it, so `PrimitiveColumnWriter<T, E>` doesn't need to
/// know whether `T` is integral or floating point.
trait NumericStat: Copy {
    fn new_accumulator() -> Accumulator;
    fn fold(self, acc: &mut Accumulator);
}

macro_rules! impl_integer_stat {
    ($ty:ty) => {
        impl NumericStat for $ty {
            fn new_accumulator() -> Accumulator {
                Accumulator::Integer {
                    min: i64::MAX,
                    max: i64::MIN,
                    sum: Some(0),
                }
            }
            fn fold(self, acc: &mut Accumulator) {
                acc.update_integer(self as i64);
            }
        }
    };
}

macro_rules! impl_double_stat {
    ($ty:ty) => {
        impl NumericStat for $ty {
            fn new_accumulator() -> Accumulator {
                Accumulator::Double {
                    min: f64::MAX,
                    max: f64::MIN,
                    sum: Some(0.0),
                }
            }
            fn fold(self, acc: &mut Accumulator) {
                acc.update_double(self as f64);
            }
        }
    };
}

impl_integer_stat!(i8);
impl_integer_stat!(i16);
impl_integer_stat!(i32);
impl_integer_stat!(i64);
impl_double_stat!(f32);
impl_double_stat!(f64);

/// Accumulates `Accumulator`-shaped row-group stats into whole-stripe
/// `ColumnStatistics`, merging across row-group boundaries.
#[derive(Default)]
struct StripeStats {
    inner: Option<ColumnStatistics>,
}

impl StripeStats {
    fn merge(&mut self, row_group: &ColumnStatistics) {
        match &mut self.inner {
            Some(stats) => stats.merge(row_group),
            None => self.inner = Some(row_group.clone()),
        }
    }

    fn snapshot(&self) -> ColumnStatistics {
        self.inner
            .clone()
            .unwrap_or_else(|| ColumnStatistics::new(0, false, None))
    }

    fn reset(&mut self) {
        self.inner = None;
    }
}

/// Encoder for primitive ORC types (int, float). Uses a specific
/// [`PrimitiveValueEncoder`] for the value bytes and an `Accumulator` for
/// statistics, kept as two independent concerns so either can evolve
/// without the other.
pub struct PrimitiveColumnWriter<T: ArrowPrimitiveType, E: PrimitiveValueEncoder<T::Native>>
where
    T::Native: NumericStat,
{
    node_id: u32,
    encoder: E,
    column_encoding: ColumnEncoding,
    present: Option<BooleanEncoder>,
    encoded_count: usize,
    row_group_stats: Accumulator,
    row_group_has_null: bool,
    stripe_stats: StripeStats,
    stripe_has_null: bool,
    _phantom: PhantomData<T>,
}

impl<T: ArrowPrimitiveType, E: PrimitiveValueEncoder<T::Native>> PrimitiveColumnWriter<T, E>
where
    T::Native: NumericStat,
{
    pub fn new(node_id: u32, column_encoding: ColumnEncoding) -> Self {
        Self {
            node_id,
            encoder: E::new(),
            column_encoding,
            present: None,
            encoded_count: 0,
            row_group_stats: T::Native::new_accumulator(),
            row_group_has_null: false,
            stripe_stats: StripeStats::default(),
            stripe_has_null: false,
            _phantom: PhantomData,
        }
    }
}

impl<T: ArrowPrimitiveType, E: PrimitiveValueEncoder<T::Native>> EstimateMemory
    for PrimitiveColumnWriter<T, E>
where
    T::Native: NumericStat,
{
    fn estimate_memory_size(&self) -> usize {
        self.encoder.estimate_memory_size()
            + self
                .present
                .as_ref()
                .map(|p| p.estimate_memory_size())
                .unwrap_or(0)
    }
}

impl<T: ArrowPrimitiveType, E: PrimitiveValueEncoder<T::Native>> ColumnWriter
    for PrimitiveColumnWriter<T, E>
where
    T::Native: NumericStat,
{
    fn write_block(&mut self, array: &ArrayRef) -> Result<usize> {
        let array = array.as_primitive::<T>();
        match (array.nulls(), &mut self.present) {
            (Some(null_buffer), Some(present)) => {
                present.extend(null_buffer);
                for index in null_buffer.valid_indices() {
                    let v = array.value(index);
                    v.fold(&mut self.row_group_stats);
                    self.encoder.write_one(v);
                }
                self.row_group_has_null |= array.null_count() > 0;
            }
            (Some(null_buffer), None) => {
                let mut present = BooleanEncoder::new();
                present.extend_present(self.encoded_count);
                present.extend(null_buffer);
                self.present = Some(present);
                for index in null_buffer.valid_indices() {
                    let v = array.value(index);
                    v.fold(&mut self.row_group_stats);
                    self.encoder.write_one(v);
                }
                self.row_group_has_null = true;
            }
            (None, _) => {
                let values = array.values();
                for &v in values {
                    v.fold(&mut self.row_group_stats);
                }
                self.encoder.write_slice(values);
                if let Some(present) = self.present.as_mut() {
                    present.extend_present(array.len())
                }
            }
        }
        self.stripe_has_null |= self.row_group_has_null;
        self.encoded_count += array.len() - array.null_count();
        Ok(array.get_array_memory_size())
    }

    fn finish_row_group(&mut self) -> HashMap<u32, ColumnStatistics> {
        let accum = std::mem::replace(&mut self.row_group_stats, T::Native::new_accumulator());
        let has_null = std::mem::take(&mut self.row_group_has_null);
        let number_of_values = self.encoded_count as u64;
        let stats = accum.finish(number_of_values, has_null);
        self.stripe_stats.merge(&stats);
        HashMap::from([(self.node_id, stats)])
    }

    fn close(&mut self) {}

    fn reset(&mut self) {
        self.encoded_count = 0;
        self.row_group_stats = T::Native::new_accumulator();
        self.row_group_has_null = false;
        self.stripe_stats.reset();
        self.stripe_has_null = false;
    }

    fn index_streams(&mut self, _hint: Option<RowIndexHint>) -> Vec<StreamDataOutput> {
        vec![]
    }

    fn data_streams(&mut self) -> Vec<StreamDataOutput> {
        let bytes = self.encoder.take_inner();
        let data = StreamDataOutput {
            node_id: self.node_id,
            kind: StreamType::Data,
            bytes,
        };
        match &mut self.present {
            Some(present) => vec![
                data,
                StreamDataOutput {
                    node_id: self.node_id,
                    kind: StreamType::Present,
                    bytes: present.finish(),
                },
            ],
            None => vec![data],
        }
    }

    fn column_encodings(&self) -> HashMap<u32, ColumnEncoding> {
        HashMap::from([(self.node_id, self.column_encoding)])
    }

    fn column_stripe_statistics(&self) -> HashMap<u32, ColumnStatistics> {
        HashMap::from([(
            self.node_id,
            self.stripe_stats.snapshot().tap_has_null(self.stripe_has_null),
        )])
    }
}

/// Small ergonomic helper so `column_stripe_statistics` can patch `has_null`
/// onto an already-built snapshot without exposing a public setter on
/// `ColumnStatistics` for a single internal use site.
trait TapHasNull {
    fn tap_has_null(self, has_null: bool) -> Self;
}

impl TapHasNull for ColumnStatistics {
    fn tap_has_null(self, has_null: bool) -> Self {
        if has_null && !self.has_null() {
            ColumnStatistics::new(self.number_of_values(), true, self.type_statistics().cloned())
        } else {
            self
        }
    }
}

pub struct BooleanColumnWriter {
    node_id: u32,
    encoder: BooleanEncoder,
    present: Option<BooleanEncoder>,
    encoded_count: usize,
    row_group_stats: Accumulator,
    row_group_has_null: bool,
    stripe_stats: StripeStats,
    stripe_has_null: bool,
}

impl BooleanColumnWriter {
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            encoder: BooleanEncoder::new(),
            present: None,
            encoded_count: 0,
            row_group_stats: Accumulator::Bucket { true_count: 0 },
            row_group_has_null: false,
            stripe_stats: StripeStats::default(),
            stripe_has_null: false,
        }
    }
}

impl EstimateMemory for BooleanColumnWriter {
    fn estimate_memory_size(&self) -> usize {
        self.encoder.estimate_memory_size()
            + self
                .present
                .as_ref()
                .map(|p| p.estimate_memory_size())
                .unwrap_or(0)
    }
}

impl ColumnWriter for BooleanColumnWriter {
    fn write_block(&mut self, array: &ArrayRef) -> Result<usize> {
        let array = array.as_boolean();
        match (array.nulls(), &mut self.present) {
            (Some(null_buffer), Some(present)) => {
                present.extend(null_buffer);
                for index in null_buffer.valid_indices() {
                    let v = array.value(index);
                    self.row_group_stats.update_bool(v);
                    self.encoder.extend_boolean(v);
                }
                self.row_group_has_null |= array.null_count() > 0;
            }
            (Some(null_buffer), None) => {
                let mut present = BooleanEncoder::new();
                present.extend_present(self.encoded_count);
                present.extend(null_buffer);
                self.present = Some(present);
                for index in null_buffer.valid_indices() {
                    let v = array.value(index);
                    self.row_group_stats.update_bool(v);
                    self.encoder.extend_boolean(v);
                }
                self.row_group_has_null = true;
            }
            (None, _) => {
                let values = array.values();
                for v in values.iter() {
                    self.row_group_stats.update_bool(v);
                }
                self.encoder.extend_bb(values);
                if let Some(present) = self.present.as_mut() {
                    present.extend_present(array.len())
                }
            }
        }
        self.stripe_has_null |= self.row_group_has_null;
        self.encoded_count += array.len() - array.null_count();
        Ok(array.get_array_memory_size())
    }

    fn finish_row_group(&mut self) -> HashMap<u32, ColumnStatistics> {
        let accum = std::mem::replace(
            &mut self.row_group_stats,
            Accumulator::Bucket { true_count: 0 },
        );
        let has_null = std::mem::take(&mut self.row_group_has_null);
        let stats = accum.finish(self.encoded_count as u64, has_null);
        self.stripe_stats.merge(&stats);
        HashMap::from([(self.node_id, stats)])
    }

    fn close(&mut self) {}

    fn reset(&mut self) {
        self.encoded_count = 0;
        self.row_group_stats = Accumulator::Bucket { true_count: 0 };
        self.row_group_has_null = false;
        self.stripe_stats.reset();
        self.stripe_has_null = false;
    }

    fn index_streams(&mut self, _hint: Option<RowIndexHint>) -> Vec<StreamDataOutput> {
        vec![]
    }

    fn data_streams(&mut self) -> Vec<StreamDataOutput> {
        let data = StreamDataOutput {
            node_id: self.node_id,
            kind: StreamType::Data,
            bytes: self.encoder.finish(),
        };
        match &mut self.present {
            Some(present) => vec![
                data,
                StreamDataOutput {
                    node_id: self.node_id,
                    kind: StreamType::Present,
                    bytes: present.finish(),
                },
            ],
            None => vec![data],
        }
    }

    fn column_encodings(&self) -> HashMap<u32, ColumnEncoding> {
        HashMap::from([(self.node_id, ColumnEncoding::Direct)])
    }

    fn column_stripe_statistics(&self) -> HashMap<u32, ColumnStatistics> {
        HashMap::from([(
            self.node_id,
            self.stripe_stats.snapshot().tap_has_null(self.stripe_has_null),
        )])
    }
}

/// Direct-encodes binary/string columns: one `Data` stream of concatenated
/// bytes, one `Length` stream of per-value lengths, an optional `Present`
/// stream. Also the replay target when a `DictionaryStringColumnWriter`
/// converts to direct encoding mid-stripe.
pub struct GenericBinaryColumnWriter<T: ByteArrayType>
where
    T::Offset: NInt,
{
    node_id: u32,
    string_bytes: BytesMut,
    length_encoder: RleV2Encoder<T::Offset, UnsignedEncoding>,
    present: Option<BooleanEncoder>,
    encoded_count: usize,
    row_group_stats: Accumulator,
    row_group_has_null: bool,
    stripe_stats: StripeStats,
    stripe_has_null: bool,
}

impl<T: ByteArrayType> GenericBinaryColumnWriter<T>
where
    T::Offset: NInt,
{
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            string_bytes: BytesMut::new(),
            length_encoder: RleV2Encoder::new(),
            present: None,
            encoded_count: 0,
            row_group_stats: Accumulator::String {
                min: None,
                max: None,
                sum: 0,
            },
            row_group_has_null: false,
            stripe_stats: StripeStats::default(),
            stripe_has_null: false,
        }
    }

    /// Ingest a single already-materialized value. Used both by dictionary
    /// conversion replay and (indirectly) by `write_block`'s null-buffer
    /// branch, so both paths keep the same present/length/stats bookkeeping.
    fn push_value(&mut self, value: Option<&[u8]>) {
        match (value, &mut self.present) {
            (Some(bytes), present) => {
                if let Some(present) = present {
                    present.extend_boolean(true);
                }
                self.row_group_stats.update_bytes(bytes);
                self.length_encoder
                    .write_one(T::Offset::from_i64(bytes.len() as i64));
                self.string_bytes.put_slice(bytes);
                self.encoded_count += 1;
            }
            (None, Some(present)) => {
                present.extend_boolean(false);
                self.row_group_has_null = true;
            }
            (None, None) => {
                let mut present = BooleanEncoder::new();
                present.extend_present(self.encoded_count);
                present.extend_boolean(false);
                self.present = Some(present);
                self.row_group_has_null = true;
            }
        }
    }
}

impl<T: ByteArrayType> EstimateMemory for GenericBinaryColumnWriter<T>
where
    T::Offset: NInt,
{
    fn estimate_memory_size(&self) -> usize {
        self.string_bytes.len()
            + self.length_encoder.estimate_memory_size()
            + self
                .present
                .as_ref()
                .map(|p| p.estimate_memory_size())
                .unwrap_or(0)
    }
}

impl<T: ByteArrayType> ColumnWriter for GenericBinaryColumnWriter<T>
where
    T::Offset: NInt,
{
    fn write_block(&mut self, array: &ArrayRef) -> Result<usize> {
        if array.is_empty() {
            return Ok(0);
        }
        let array = array.as_bytes::<T>();
        match (array.nulls(), &mut self.present) {
            (Some(null_buffer), Some(present)) => {
                present.extend(null_buffer);
                for index in null_buffer.valid_indices() {
                    let bytes = array.value(index).as_ref();
                    self.row_group_stats.update_bytes(bytes);
                    self.length_encoder.write_one(array.value_length(index));
                    self.string_bytes.put_slice(bytes);
                }
                self.encoded_count += array.len() - array.null_count();
                self.row_group_has_null |= array.null_count() > 0;
            }
            (Some(null_buffer), None) => {
                let mut present = BooleanEncoder::new();
                present.extend_present(self.encoded_count);
                present.extend(null_buffer);
                self.present = Some(present);
                for index in null_buffer.valid_indices() {
                    let bytes = array.value(index).as_ref();
                    self.row_group_stats.update_bytes(bytes);
                    self.length_encoder.write_one(array.value_length(index));
                    self.string_bytes.put_slice(bytes);
                }
                self.encoded_count += array.len() - array.null_count();
                self.row_group_has_null = true;
            }
            (None, _) => {
                let offsets = array.offsets();
                let first_offset = offsets[0];
                let mut length_to_copy = <T::Offset as num::Zero>::zero();
                let mut prev_offset = first_offset;
                for &offset in offsets.iter().skip(1) {
                    let length = offset - prev_offset;
                    self.length_encoder.write_one(length);
                    length_to_copy += length;
                    prev_offset = offset;
                }
                let first_offset_usize = first_offset.as_i64() as usize;
                let end_offset = first_offset_usize + length_to_copy.as_i64() as usize;
                let string_bytes = &array.value_data()[first_offset_usize..end_offset];
                for index in 0..array.len() {
                    self.row_group_stats.update_bytes(array.value(index).as_ref());
                }
                self.string_bytes.put_slice(string_bytes);
                if let Some(present) = self.present.as_mut() {
                    present.extend_present(array.len())
                }
                self.encoded_count += array.len();
            }
        }
        self.stripe_has_null |= self.row_group_has_null;
        Ok(array.get_array_memory_size())
    }

    fn finish_row_group(&mut self) -> HashMap<u32, ColumnStatistics> {
        let accum = std::mem::replace(
            &mut self.row_group_stats,
            Accumulator::String {
                min: None,
                max: None,
                sum: 0,
            },
        );
        let has_null = std::mem::take(&mut self.row_group_has_null);
        let stats = accum.finish(self.encoded_count as u64, has_null);
        self.stripe_stats.merge(&stats);
        HashMap::from([(self.node_id, stats)])
    }

    fn close(&mut self) {}

    fn reset(&mut self) {
        self.encoded_count = 0;
        self.row_group_stats = Accumulator::String {
            min: None,
            max: None,
            sum: 0,
        };
        self.row_group_has_null = false;
        self.stripe_stats.reset();
        self.stripe_has_null = false;
    }

    fn index_streams(&mut self, _hint: Option<RowIndexHint>) -> Vec<StreamDataOutput> {
        vec![]
    }

    fn data_streams(&mut self) -> Vec<StreamDataOutput> {
        let data_bytes = std::mem::take(&mut self.string_bytes);
        let data = StreamDataOutput {
            node_id: self.node_id,
            kind: StreamType::Data,
            bytes: data_bytes.into(),
        };
        let length = StreamDataOutput {
            node_id: self.node_id,
            kind: StreamType::Length,
            bytes: self.length_encoder.take_inner(),
        };
        match &mut self.present {
            Some(present) => vec![
                data,
                length,
                StreamDataOutput {
                    node_id: self.node_id,
                    kind: StreamType::Present,
                    bytes: present.finish(),
                },
            ],
            None => vec![data, length],
        }
    }

    fn column_encodings(&self) -> HashMap<u32, ColumnEncoding> {
        HashMap::from([(self.node_id, ColumnEncoding::DirectV2)])
    }

    fn column_stripe_statistics(&self) -> HashMap<u32, ColumnStatistics> {
        HashMap::from([(
            self.node_id,
            self.stripe_stats.snapshot().tap_has_null(self.stripe_has_null),
        )])
    }
}

/// A string column that starts dictionary-encoded and can be converted to
/// direct encoding mid-stripe by the dictionary optimizer (`spec.md` §4.4).
/// No teacher equivalent exists; `GenericBinaryColumnWriter` above is the
/// direct-encoding fallback this replays into.
pub struct DictionaryStringColumnWriter<T: ByteArrayType>
where
    T::Offset: NInt,
{
    node_id: u32,
    state: DictionaryState<T>,
}

enum DictionaryState<T: ByteArrayType>
where
    T::Offset: NInt,
{
    Dictionary(Box<DictionaryEncoder<T>>),
    Direct(Box<GenericBinaryColumnWriter<T>>),
}

struct DictionaryEncoder<T: ByteArrayType>
where
    T::Offset: NInt,
{
    node_id: u32,
    dictionary: Vec<Vec<u8>>,
    lookup: HashMap<Vec<u8>, u32>,
    /// One entry per row seen this stripe, `None` for a null row. Trades a
    /// few bytes per row for a trivial, order-preserving replay path when
    /// converting to direct encoding.
    rows: Vec<Option<u32>>,
    total_value_bytes: usize,
    row_group_start: usize,
    row_group_stats: Accumulator,
    row_group_has_null: bool,
    stripe_stats: StripeStats,
    stripe_has_null: bool,
    _phantom: PhantomData<T>,
}

impl<T: ByteArrayType> DictionaryEncoder<T>
where
    T::Offset: NInt,
{
    fn new(node_id: u32) -> Self {
        Self {
            node_id,
            dictionary: Vec::new(),
            lookup: HashMap::new(),
            rows: Vec::new(),
            total_value_bytes: 0,
            row_group_start: 0,
            row_group_stats: Accumulator::String {
                min: None,
                max: None,
                sum: 0,
            },
            row_group_has_null: false,
            stripe_stats: StripeStats::default(),
            stripe_has_null: false,
            _phantom: PhantomData,
        }
    }

    fn intern(&mut self, value: &[u8]) -> u32 {
        if let Some(&id) = self.lookup.get(value) {
            return id;
        }
        let id = self.dictionary.len() as u32;
        self.dictionary.push(value.to_vec());
        self.lookup.insert(value.to_vec(), id);
        id
    }

    fn push(&mut self, value: Option<&[u8]>) {
        match value {
            Some(bytes) => {
                self.row_group_stats.update_bytes(bytes);
                self.total_value_bytes += bytes.len();
                let id = self.intern(bytes);
                self.rows.push(Some(id));
            }
            None => {
                self.rows.push(None);
                self.row_group_has_null = true;
            }
        }
    }

    fn dictionary_bytes(&self) -> usize {
        self.dictionary.iter().map(|e| e.len()).sum()
    }

    /// Replay every row buffered so far (across the whole stripe, not just
    /// the open row group) into a fresh direct-encoded writer, preserving
    /// row order and null positions exactly.
    fn replay_into_direct(&self) -> GenericBinaryColumnWriter<T> {
        let mut direct = GenericBinaryColumnWriter::<T>::new(self.node_id);
        for row in &self.rows {
            match row {
                Some(id) => direct.push_value(Some(&self.dictionary[*id as usize])),
                None => direct.push_value(None),
            }
        }
        direct
    }
}

impl<T: ByteArrayType> EstimateMemory for DictionaryEncoder<T>
where
    T::Offset: NInt,
{
    fn estimate_memory_size(&self) -> usize {
        self.dictionary_bytes() + self.rows.len() * std::mem::size_of::<Option<u32>>()
    }
}

impl<T: ByteArrayType> DictionaryStringColumnWriter<T>
where
    T::Offset: NInt,
{
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            state: DictionaryState::Dictionary(Box::new(DictionaryEncoder::new(node_id))),
        }
    }
}

impl<T: ByteArrayType> EstimateMemory for DictionaryStringColumnWriter<T>
where
    T::Offset: NInt,
{
    fn estimate_memory_size(&self) -> usize {
        match &self.state {
            DictionaryState::Dictionary(d) => d.estimate_memory_size(),
            DictionaryState::Direct(d) => d.estimate_memory_size(),
        }
    }
}

impl<T: ByteArrayType> ColumnWriter for DictionaryStringColumnWriter<T>
where
    T::Offset: NInt,
{
    fn write_block(&mut self, array: &ArrayRef) -> Result<usize> {
        match &mut self.state {
            DictionaryState::Dictionary(dict) => {
                let typed = array.as_bytes::<T>();
                for i in 0..typed.len() {
                    if typed.is_valid(i) {
                        dict.push(Some(typed.value(i).as_ref()));
                    } else {
                        dict.push(None);
                    }
                }
                dict.stripe_has_null |= dict.row_group_has_null;
                Ok(array.get_array_memory_size())
            }
            DictionaryState::Direct(direct) => direct.write_block(array),
        }
    }

    fn finish_row_group(&mut self) -> HashMap<u32, ColumnStatistics> {
        match &mut self.state {
            DictionaryState::Dictionary(dict) => {
                let accum = std::mem::replace(
                    &mut dict.row_group_stats,
                    Accumulator::String {
                        min: None,
                        max: None,
                        sum: 0,
                    },
                );
                let has_null = std::mem::take(&mut dict.row_group_has_null);
                let row_count = (dict.rows.len() - dict.row_group_start) as u64;
                dict.row_group_start = dict.rows.len();
                let stats = accum.finish(row_count, has_null);
                dict.stripe_stats.merge(&stats);
                HashMap::from([(self.node_id, stats)])
            }
            DictionaryState::Direct(direct) => direct.finish_row_group(),
        }
    }

    fn close(&mut self) {
        if let DictionaryState::Direct(direct) = &mut self.state {
            direct.close();
        }
    }

    fn reset(&mut self) {
        // A dictionary is only useful within one stripe; every stripe
        // starts fresh regardless of which state we ended the previous one
        // in.
        self.state = DictionaryState::Dictionary(Box::new(DictionaryEncoder::new(self.node_id)));
    }

    fn index_streams(&mut self, _hint: Option<RowIndexHint>) -> Vec<StreamDataOutput> {
        vec![]
    }

    fn data_streams(&mut self) -> Vec<StreamDataOutput> {
        match &mut self.state {
            DictionaryState::Dictionary(dict) => {
                let mut index_encoder = RleV2Encoder::<i32, UnsignedEncoding>::new();
                let mut length_encoder = RleV2Encoder::<i32, UnsignedEncoding>::new();
                let mut dictionary_bytes = BytesMut::new();
                let mut present = dict.rows.iter().any(Option::is_none).then(BooleanEncoder::new);

                for entry in &dict.dictionary {
                    length_encoder.write_one(entry.len() as i32);
                    dictionary_bytes.put_slice(entry);
                }
                for row in &dict.rows {
                    match row {
                        Some(id) => {
                            index_encoder.write_one(*id as i32);
                            if let Some(present) = present.as_mut() {
                                present.extend_boolean(true);
                            }
                        }
                        None => {
                            if let Some(present) = present.as_mut() {
                                present.extend_boolean(false);
                            }
                        }
                    }
                }

                let mut streams = vec![
                    StreamDataOutput {
                        node_id: self.node_id,
                        kind: StreamType::Data,
                        bytes: index_encoder.take_inner(),
                    },
                    StreamDataOutput {
                        node_id: self.node_id,
                        kind: StreamType::DictionaryData,
                        bytes: dictionary_bytes.into(),
                    },
                    StreamDataOutput {
                        node_id: self.node_id,
                        kind: StreamType::Length,
                        bytes: length_encoder.take_inner(),
                    },
                ];
                if let Some(mut present) = present {
                    streams.push(StreamDataOutput {
                        node_id: self.node_id,
                        kind: StreamType::Present,
                        bytes: present.finish(),
                    });
                }
                streams
            }
            DictionaryState::Direct(direct) => direct.data_streams(),
        }
    }

    fn column_encodings(&self) -> HashMap<u32, ColumnEncoding> {
        match &self.state {
            DictionaryState::Dictionary(dict) => HashMap::from([(
                self.node_id,
                ColumnEncoding::DictionaryV2 {
                    size: dict.dictionary.len(),
                },
            )]),
            DictionaryState::Direct(direct) => direct.column_encodings(),
        }
    }

    fn column_stripe_statistics(&self) -> HashMap<u32, ColumnStatistics> {
        match &self.state {
            DictionaryState::Dictionary(dict) => HashMap::from([(
                self.node_id,
                dict.stripe_stats.snapshot().tap_has_null(dict.stripe_has_null),
            )]),
            DictionaryState::Direct(direct) => direct.column_stripe_statistics(),
        }
    }

    fn as_dictionary_writer_mut(&mut self) -> Option<&mut dyn DictionaryColumnWriter> {
        Some(self)
    }
}

impl<T: ByteArrayType> DictionaryColumnWriter for DictionaryStringColumnWriter<T>
where
    T::Offset: NInt,
{
    fn estimate_dictionary_ratio(&self) -> f64 {
        match &self.state {
            DictionaryState::Dictionary(dict) => {
                let index_bytes = dict.rows.len() * std::mem::size_of::<i32>();
                let encoded = (dict.dictionary_bytes() + index_bytes) as f64;
                let direct = dict.total_value_bytes.max(1) as f64;
                encoded / direct
            }
            // Already direct: report a ratio of 1.0 (no further benefit
            // from "converting", since there's no dictionary left).
            DictionaryState::Direct(_) => 1.0,
        }
    }

    fn convert_to_direct(&mut self) {
        if let DictionaryState::Dictionary(dict) = &self.state {
            let direct = dict.replay_into_direct();
            self.state = DictionaryState::Direct(Box::new(direct));
        }
    }

    fn dictionary_memory_bytes(&self) -> usize {
        match &self.state {
            DictionaryState::Dictionary(dict) => dict.dictionary_bytes(),
            DictionaryState::Direct(_) => 0,
        }
    }
}

/// A struct-typed (nested) column. Owns no data stream of its own, only an
/// optional `Present` stream for its own nullability, and forwards
/// `write_block` to each child in field order.
pub struct StructColumnWriter {
    node_id: u32,
    present: Option<BooleanEncoder>,
    encoded_count: usize,
    stripe_row_count: u64,
    stripe_has_null: bool,
    children: Vec<Box<dyn ColumnWriter>>,
}

impl StructColumnWriter {
    pub fn new(node_id: u32, children: Vec<Box<dyn ColumnWriter>>) -> Self {
        Self {
            node_id,
            present: None,
            encoded_count: 0,
            stripe_row_count: 0,
            stripe_has_null: false,
            children,
        }
    }
}

impl EstimateMemory for StructColumnWriter {
    fn estimate_memory_size(&self) -> usize {
        self.present.as_ref().map(|p| p.estimate_memory_size()).unwrap_or(0)
            + self.children.iter().map(|c| c.estimate_memory_size()).sum::<usize>()
    }
}

impl ColumnWriter for StructColumnWriter {
    fn write_block(&mut self, array: &ArrayRef) -> Result<usize> {
        let struct_array = array.as_struct();
        match (struct_array.nulls(), &mut self.present) {
            (Some(null_buffer), Some(present)) => present.extend(null_buffer),
            (Some(null_buffer), None) => {
                let mut present = BooleanEncoder::new();
                present.extend_present(self.encoded_count);
                present.extend(null_buffer);
                self.present = Some(present);
            }
            (None, Some(present)) => present.extend_present(array.len()),
            (None, None) => {}
        }
        self.encoded_count += array.len() - array.null_count();
        self.stripe_row_count += array.len() as u64;
        self.stripe_has_null |= array.null_count() > 0;

        let mut raw_size = 0;
        for (child_array, child) in struct_array.columns().iter().zip(self.children.iter_mut()) {
            raw_size += child.write_block(child_array)?;
        }
        Ok(raw_size)
    }

    fn finish_row_group(&mut self) -> HashMap<u32, ColumnStatistics> {
        let mut out = HashMap::new();
        out.insert(
            self.node_id,
            ColumnStatistics::new(self.encoded_count as u64, self.stripe_has_null, None),
        );
        for child in &mut self.children {
            out.extend(child.finish_row_group());
        }
        out
    }

    fn close(&mut self) {
        for child in &mut self.children {
            child.close();
        }
    }

    fn reset(&mut self) {
        self.encoded_count = 0;
        self.stripe_row_count = 0;
        self.stripe_has_null = false;
        for child in &mut self.children {
            child.reset();
        }
    }

    fn index_streams(&mut self, _hint: Option<RowIndexHint>) -> Vec<StreamDataOutput> {
        vec![]
    }

    fn data_streams(&mut self) -> Vec<StreamDataOutput> {
        match &mut self.present {
            Some(present) => vec![StreamDataOutput {
                node_id: self.node_id,
                kind: StreamType::Present,
                bytes: present.finish(),
            }],
            None => vec![],
        }
    }

    fn column_encodings(&self) -> HashMap<u32, ColumnEncoding> {
        let mut out = HashMap::from([(self.node_id, ColumnEncoding::Direct)]);
        for child in &self.children {
            out.extend(child.column_encodings());
        }
        out
    }

    fn column_stripe_statistics(&self) -> HashMap<u32, ColumnStatistics> {
        let mut out = HashMap::from([(
            self.node_id,
            ColumnStatistics::new(self.stripe_row_count, self.stripe_has_null, None),
        )]);
        for child in &self.children {
            out.extend(child.column_stripe_statistics());
        }
        out
    }

    fn nested_column_writers(&self) -> Vec<&dyn ColumnWriter> {
        self.children.iter().map(|c| c.as_ref()).collect()
    }

    fn nested_column_writers_mut(&mut self) -> Vec<&mut dyn ColumnWriter> {
        self.children.iter_mut().map(|c| c.as_mut()).collect()
    }

    fn retained_bytes(&self) -> usize {
        self.buffered_bytes() + self.children.iter().map(|c| c.retained_bytes()).sum::<usize>()
    }
}

pub type FloatColumnWriter = PrimitiveColumnWriter<Float32Type, FloatValueEncoder<Float32Type>>;
pub type DoubleColumnWriter = PrimitiveColumnWriter<Float64Type, FloatValueEncoder<Float64Type>>;
pub type ByteColumnWriter = PrimitiveColumnWriter<Int8Type, ByteRleEncoder>;
pub type Int16ColumnWriter = PrimitiveColumnWriter<Int16Type, RleV2Encoder<i16, SignedEncoding>>;
pub type Int32ColumnWriter = PrimitiveColumnWriter<Int32Type, RleV2Encoder<i32, SignedEncoding>>;
pub type Int64ColumnWriter = PrimitiveColumnWriter<Int64Type, RleV2Encoder<i64, SignedEncoding>>;
pub type StringDirectColumnWriter = GenericBinaryColumnWriter<GenericStringType<i32>>;
pub type LargeStringDirectColumnWriter = GenericBinaryColumnWriter<GenericStringType<i64>>;
pub type BinaryColumnWriter = GenericBinaryColumnWriter<GenericBinaryType<i32>>;
pub type LargeBinaryColumnWriter = GenericBinaryColumnWriter<GenericBinaryType<i64>>;
pub type StringColumnWriter = DictionaryStringColumnWriter<GenericStringType<i32>>;
pub type LargeStringColumnWriter = DictionaryStringColumnWriter<GenericStringType<i64>>;

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, StringArray};
    use std::sync::Arc;

    #[test]
    fn primitive_writer_tracks_integer_stats_across_row_groups() {
        let mut writer = Int32ColumnWriter::new(1, ColumnEncoding::DirectV2);
        let array: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 3]));
        writer.write_block(&array).unwrap();
        let stats = writer.finish_row_group();
        let stats = stats.get(&1).unwrap();
        assert_eq!(stats.number_of_values(), 3);
        match stats.type_statistics().unwrap() {
            TypeStatistics::Integer { min, max, sum } => {
                assert_eq!(*min, 1);
                assert_eq!(*max, 3);
                assert_eq!(*sum, Some(6));
            }
            other => panic!("unexpected statistics variant: {other:?}"),
        }
    }

    #[test]
    fn dictionary_writer_converts_to_direct_and_preserves_values() {
        let mut writer = StringColumnWriter::new(1);
        let array: ArrayRef = Arc::new(StringArray::from(vec![
            Some("a"),
            None,
            Some("b"),
            Some("a"),
        ]));
        writer.write_block(&array).unwrap();
        assert!(writer.estimate_dictionary_ratio() <= 1.0);

        writer.convert_to_direct();
        assert!(matches!(writer.state, DictionaryState::Direct(_)));

        let streams = writer.data_streams();
        // Direct encoding emits Data + Length (+ Present, since there's a null).
        assert_eq!(streams.len(), 3);
    }

    #[test]
    fn struct_writer_forwards_to_children_and_reports_nested_writers() {
        let child: Box<dyn ColumnWriter> =
            Box::new(Int32ColumnWriter::new(2, ColumnEncoding::DirectV2));
        let mut writer = StructColumnWriter::new(1, vec![child]);
        assert_eq!(writer.nested_column_writers().len(), 1);

        let values: ArrayRef = Arc::new(Int32Array::from(vec![10, 20]));
        let struct_array: ArrayRef = Arc::new(arrow::array::StructArray::from(vec![(
            Arc::new(arrow::datatypes::Field::new("a", arrow::datatypes::DataType::Int32, false)),
            values,
        )]));
        writer.write_block(&struct_array).unwrap();
        let stats = writer.finish_row_group();
        assert_eq!(stats.len(), 2);
    }
}
