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

//! Reorders a stripe's data streams for read locality: grouped by top-level
//! column, then ordered within a column by stream kind so a reader that
//! only wants a prefix of a column's streams (e.g. just `Present`) reads a
//! contiguous range.

use std::collections::HashMap;

use super::{StreamDataOutput, StreamType};

/// Stable ordering within a column: cheap-to-skip structural streams first,
/// bulk value data last, so partial reads (e.g. just checking nullability)
/// touch the smallest possible prefix.
fn stream_kind_rank(kind: StreamType) -> u8 {
    match kind {
        StreamType::Present => 0,
        StreamType::Secondary => 1,
        StreamType::Length => 2,
        StreamType::DictionaryData => 3,
        StreamType::Data => 4,
    }
}

/// Maps a node id to the top-level column index it belongs to, so streams
/// from a nested column's descendants sort adjacent to their parent's own
/// streams rather than interleaving with siblings.
pub struct StreamLayout {
    node_to_top_level_column: HashMap<u32, u32>,
}

impl StreamLayout {
    /// `top_level_columns` lists, for each top-level column in declared
    /// order, every node id (itself plus descendants) that belongs to it.
    pub fn new(top_level_columns: &[Vec<u32>]) -> Self {
        let mut node_to_top_level_column = HashMap::new();
        for (column_index, nodes) in top_level_columns.iter().enumerate() {
            for &node_id in nodes {
                node_to_top_level_column.insert(node_id, column_index as u32);
            }
        }
        Self {
            node_to_top_level_column,
        }
    }

    /// Reorder `streams` in place: by top-level column (declaration order),
    /// then by node id within a column (parent before its own descendants'
    /// interleaving is preserved by a stable sort), then by stream kind.
    pub fn reorder(&self, mut streams: Vec<StreamDataOutput>) -> Vec<StreamDataOutput> {
        streams.sort_by_key(|s| {
            let column = self
                .node_to_top_level_column
                .get(&s.node_id)
                .copied()
                .unwrap_or(u32::MAX);
            (column, s.node_id, stream_kind_rank(s.kind))
        });
        streams
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn stream(node_id: u32, kind: StreamType) -> StreamDataOutput {
        StreamDataOutput {
            node_id,
            kind,
            bytes: Bytes::new(),
        }
    }

    #[test]
    fn groups_by_top_level_column_then_kind() {
        let layout = StreamLayout::new(&[vec![1], vec![2, 3]]);
        let streams = vec![
            stream(2, StreamType::Data),
            stream(1, StreamType::Data),
            stream(1, StreamType::Present),
            stream(3, StreamType::Present),
        ];
        let ordered = layout.reorder(streams);
        let order: Vec<(u32, StreamType)> = ordered.iter().map(|s| (s.node_id, s.kind)).collect();
        assert_eq!(
            order,
            vec![
                (1, StreamType::Present),
                (1, StreamType::Data),
                (2, StreamType::Data),
                (3, StreamType::Present),
            ]
        );
    }
}
