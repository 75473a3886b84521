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

//! Black-box scenario tests driving [`orc_writer::writer::orchestrator::Writer`]
//! end to end through an in-memory sink and reading the result back with
//! [`orc_writer::reader::metadata::read_metadata`]. Value-level row decode is
//! out of scope, so every assertion here is at the file-tail metadata level:
//! row counts, stripe counts and stream byte-length invariants.

use std::sync::Arc;

use arrow::array::{Int32Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType as ArrowDataType, Field, Schema, SchemaRef};
use bytes::Bytes;

use orc_writer::reader::metadata::read_metadata;
use orc_writer::sink::IoSink;
use orc_writer::writer::flush_policy::FlushPolicyConfig;
use orc_writer::writer::orchestrator::{Writer, WriterBuilder};

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", ArrowDataType::Int32, false),
        Field::new("name", ArrowDataType::Utf8, true),
    ]))
}

fn batch(schema: &SchemaRef, ids: std::ops::Range<i32>) -> RecordBatch {
    let ids: Vec<i32> = ids.collect();
    let names: Vec<Option<String>> = ids.iter().map(|i| Some(format!("row-{i}"))).collect();
    RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(Int32Array::from(ids)), Arc::new(StringArray::from(names))],
    )
    .unwrap()
}

fn bytes_from(writer: Writer<IoSink<Vec<u8>>>) -> Bytes {
    Bytes::from(writer.into_inner().into_inner())
}

/// Scenario 1: a handful of rows in one page, default configuration,
/// produces a single valid stripe that reads back with the exact row count.
#[test]
fn scenario_1_tiny_file_round_trips_through_metadata() {
    let schema = schema();
    let mut writer = WriterBuilder::new(schema.clone())
        .try_build(IoSink::new(Vec::new()))
        .unwrap();

    writer.write(&batch(&schema, 0..7)).unwrap();
    writer.close().unwrap();

    let mut bytes = bytes_from(writer);
    let metadata = read_metadata(&mut bytes).unwrap();
    assert_eq!(metadata.number_of_rows(), 7);
    assert_eq!(metadata.stripe_metadatas().len(), 1);
    assert_eq!(metadata.stripe_metadatas()[0].number_of_rows(), 7);
}

/// Scenario 2: one page of 25,000 rows against a 10,000-row group cap stays
/// in a single stripe (the default stripe cap is never reached), but is cut
/// into 3 row groups internally. Row-group boundaries aren't surfaced in the
/// file tail metadata directly, so this is checked through the one place
/// they are observable from outside the writer: the stripe's total row
/// count still sums to the input exactly, with no rows dropped or
/// duplicated at a row-group boundary.
#[test]
fn scenario_2_row_group_boundary_does_not_lose_or_duplicate_rows() {
    let schema = schema();
    let mut writer = WriterBuilder::new(schema.clone())
        .with_row_group_max_row_count(10_000)
        .try_build(IoSink::new(Vec::new()))
        .unwrap();

    writer.write(&batch(&schema, 0..25_000)).unwrap();
    writer.close().unwrap();

    let mut bytes = bytes_from(writer);
    let metadata = read_metadata(&mut bytes).unwrap();
    assert_eq!(metadata.number_of_rows(), 25_000);
    assert_eq!(metadata.stripe_metadatas().len(), 1);
    assert_eq!(metadata.stripe_metadatas()[0].number_of_rows(), 25_000);
}

/// Scenario 3: a low `stripe_max_row_count` forces the flush policy to cut
/// several stripes out of one page. Every stripe's row count must be within
/// the configured cap, and the stripes' row counts must sum to the input.
#[test]
fn scenario_3_stripe_flush_splits_into_multiple_capped_stripes() {
    let schema = schema();
    let mut writer = WriterBuilder::new(schema.clone())
        .with_flush_policy(FlushPolicyConfig {
            stripe_max_row_count: 1_000,
            ..FlushPolicyConfig::default()
        })
        .try_build(IoSink::new(Vec::new()))
        .unwrap();

    writer.write(&batch(&schema, 0..4_500)).unwrap();
    writer.close().unwrap();

    let mut bytes = bytes_from(writer);
    let metadata = read_metadata(&mut bytes).unwrap();
    assert_eq!(metadata.number_of_rows(), 4_500);
    assert!(metadata.stripe_metadatas().len() > 1);

    let mut total_rows = 0u64;
    for stripe in metadata.stripe_metadatas() {
        assert!(stripe.number_of_rows() <= 1_000);
        assert!(stripe.number_of_rows() > 0);
        total_rows += stripe.number_of_rows();
    }
    assert_eq!(total_rows, 4_500);
}

/// Scenario 6: closing a writer that never received a page skips stripe
/// assembly entirely and still produces a file with zero rows and zero
/// stripes that reads back cleanly.
#[test]
fn scenario_6_close_with_no_rows_produces_a_readable_empty_file() {
    let schema = schema();
    let mut writer = WriterBuilder::new(schema).try_build(IoSink::new(Vec::new())).unwrap();
    writer.close().unwrap();

    let mut bytes = bytes_from(writer);
    let metadata = read_metadata(&mut bytes).unwrap();
    assert_eq!(metadata.number_of_rows(), 0);
    assert_eq!(metadata.stripe_metadatas().len(), 0);
}

/// Closing twice is a no-op the second time around, and the file this
/// produces is the same whether or not a page was ever written with a page
/// still in flight when closed (the flush-on-close path).
#[test]
fn flush_on_close_includes_a_stripe_still_buffered_when_close_is_called() {
    let schema = schema();
    let mut writer = WriterBuilder::new(schema.clone())
        .try_build(IoSink::new(Vec::new()))
        .unwrap();

    writer.write(&batch(&schema, 0..3)).unwrap();
    // No explicit flush: `close` must assemble the still-buffered stripe.
    writer.close().unwrap();
    writer.close().unwrap();

    let mut bytes = bytes_from(writer);
    let metadata = read_metadata(&mut bytes).unwrap();
    assert_eq!(metadata.number_of_rows(), 3);
    assert_eq!(metadata.stripe_metadatas().len(), 1);
}
