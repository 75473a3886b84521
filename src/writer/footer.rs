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

//! File-level footer and postscript assembly (`bufferFileFooter`), performed
//! once when the writer closes with reason CLOSED.

use std::collections::HashMap;

use arrow::datatypes::DataType as ArrowDataType;
use prost::Message;

use crate::compression::CompressionConfig;
use crate::encryption::EncryptionInfo;
use crate::error::{Result, UnsupportedTypeVariantSnafu};
use crate::proto;
use crate::schema::FlatNode;
use crate::statistics::ColumnStatistics;

use super::stripe::StripeInformation;
use super::stripe_cache::DwrfStripeCacheData;

/// Required magic bytes at the start of every ORC/DWRF file.
pub const MAGIC: &[u8] = b"ORC";

/// Writer version recorded in the postscript. Real ORC writers use this to
/// flag fixes to historical encoding bugs (e.g. HIVE-8732); this writer has
/// none to flag, so it uses the same "no specific version" sentinel the
/// teacher's writer already did.
const WRITER_VERSION: u32 = u32::MAX;

/// Everything file finalization needs about one closed stripe besides the
/// bytes already appended to the sink.
pub struct ClosedStripe {
    pub information: StripeInformation,
    /// Dense, node-id-indexed per-stripe statistics, as returned by
    /// `StripeAssembly::finish_stripe`.
    pub statistics: Vec<ColumnStatistics>,
}

fn leaf_type_kind(arrow_type: &ArrowDataType) -> Result<proto::r#type::Kind> {
    use proto::r#type::Kind;
    match arrow_type {
        ArrowDataType::Boolean => Ok(Kind::Boolean),
        ArrowDataType::Int8 => Ok(Kind::Byte),
        ArrowDataType::Int16 => Ok(Kind::Short),
        ArrowDataType::Int32 => Ok(Kind::Int),
        ArrowDataType::Int64 => Ok(Kind::Long),
        ArrowDataType::Float32 => Ok(Kind::Float),
        ArrowDataType::Float64 => Ok(Kind::Double),
        ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 => Ok(Kind::String),
        ArrowDataType::Binary | ArrowDataType::LargeBinary => Ok(Kind::Binary),
        _ => UnsupportedTypeVariantSnafu {
            msg: "column type not supported by the stripe writer",
        }
        .fail(),
    }
}

/// Serializes the flattened node tree into the `proto::Type` list the
/// footer carries, in node-id order so `Type.subtypes` indices line up
/// directly with `Footer.statistics`/`StripeInformation` node numbering.
pub(crate) fn build_type_tree(nodes: &[FlatNode]) -> Result<Vec<proto::Type>> {
    nodes
        .iter()
        .map(|node| {
            if matches!(node.arrow_type, ArrowDataType::Struct(_)) {
                let field_names = node
                    .children
                    .iter()
                    .map(|&id| nodes[id as usize].name.clone())
                    .collect();
                Ok(proto::Type {
                    kind: Some(proto::r#type::Kind::Struct.into()),
                    subtypes: node.children.clone(),
                    field_names,
                    maximum_length: None,
                    precision: None,
                    scale: None,
                })
            } else {
                Ok(proto::Type {
                    kind: Some(leaf_type_kind(&node.arrow_type)?.into()),
                    subtypes: vec![],
                    field_names: vec![],
                    maximum_length: None,
                    precision: None,
                    scale: None,
                })
            }
        })
        .collect()
}

fn build_user_metadata(user_metadata: &HashMap<String, String>) -> Vec<proto::UserMetadataItem> {
    user_metadata
        .iter()
        .map(|(name, value)| proto::UserMetadataItem {
            name: Some(name.clone()),
            value: Some(value.clone().into_bytes()),
        })
        .collect()
}

/// Emits the Metadata section: every closed stripe's full, unstripped
/// per-node statistics, written just before the file footer.
pub fn build_metadata_section(stripes: &[ClosedStripe]) -> proto::Metadata {
    proto::Metadata {
        stripe_stats: stripes
            .iter()
            .map(|stripe| proto::StripeStatistics {
                col_stats: stripe.statistics.iter().map(proto::ColumnStatistics::from).collect(),
            })
            .collect(),
    }
}

/// Rolls every stripe's per-node statistics into one dense, node-id-indexed
/// file-level list (`spec.md` §4.5 step 2): counts, min/max and raw/storage
/// sizes all sum across stripes via `ColumnStatistics::merge`. Per-map-key
/// sizes from the original design are not modeled: Map columns are rejected
/// outright by `schema::flatten_field`, so there is never a map-typed node
/// to attach per-key sizes to.
pub(crate) fn merge_file_statistics(
    stripes: &[ClosedStripe],
    node_count: usize,
) -> Vec<ColumnStatistics> {
    let mut merged: Vec<ColumnStatistics> = (0..node_count)
        .map(|_| ColumnStatistics::new(0, false, None))
        .collect();
    for stripe in stripes {
        for (node_id, stats) in stripe.statistics.iter().enumerate() {
            merged[node_id].merge(stats);
        }
    }
    merged
}

/// Partitions merged file-level statistics by encryption membership
/// (`spec.md` §4.5 step 3): nodes outside any group keep their full stats in
/// the plaintext list; nodes inside a group get a stripped-down
/// `{count, raw-size, storage-size}` entry in the plaintext list, while the
/// group's full statistics are serialized and encrypted as a single
/// `FileStatistics` blob per group.
fn split_statistics_by_encryption(
    merged: &[ColumnStatistics],
    encryption: Option<&EncryptionInfo>,
) -> Result<(Vec<proto::ColumnStatistics>, Option<proto::Encryption>)> {
    let Some(encryption) = encryption else {
        return Ok((
            merged.iter().map(proto::ColumnStatistics::from).collect(),
            None,
        ));
    };

    let mut groups = Vec::with_capacity(encryption.groups().len());
    for (group_idx, group) in encryption.groups().iter().enumerate() {
        let plaintext = proto::FileStatistics {
            statistics: group
                .nodes()
                .iter()
                .map(|&id| proto::ColumnStatistics::from(&merged[id as usize]))
                .collect(),
        }
        .encode_to_vec();
        let ciphertext = encryption.encrypt_group_payload(group_idx, &plaintext)?;
        groups.push(proto::EncryptionGroup {
            nodes: group.nodes().to_vec(),
            statistics: Some(ciphertext),
        });
    }

    let unencrypted = merged
        .iter()
        .enumerate()
        .map(|(node_id, stats)| match encryption.group_for_node(node_id as u32) {
            Some(_) => proto::ColumnStatistics {
                number_of_values: Some(stats.number_of_values()),
                has_null: Some(stats.has_null()),
                bytes_on_disk: Some(stats.storage_size()),
                ..Default::default()
            },
            None => proto::ColumnStatistics::from(stats),
        })
        .collect();

    Ok((unencrypted, Some(proto::Encryption { groups })))
}

/// Builds the file footer. `header_length` is the number of magic bytes
/// already written at the start of the file (always [`MAGIC`]'s length for
/// this writer, but kept as a parameter rather than hardcoded so the caller
/// doesn't have to reach into this module just to know it).
#[allow(clippy::too_many_arguments)]
pub fn build_footer(
    nodes: &[FlatNode],
    stripes: &[ClosedStripe],
    user_metadata: &HashMap<String, String>,
    encryption: Option<&EncryptionInfo>,
    stripe_cache_offsets: &[u64],
    row_index_stride: Option<u32>,
    header_length: u64,
) -> Result<proto::Footer> {
    let body_length: u64 = stripes.iter().map(|s| s.information.total_byte_size()).sum();
    let number_of_rows: u64 = stripes.iter().map(|s| s.information.row_count as u64).sum();
    let stripe_infos = stripes
        .iter()
        .map(|s| proto::StripeInformation::from(&s.information))
        .collect();
    let types = build_type_tree(nodes)?;
    let merged = merge_file_statistics(stripes, nodes.len());
    let (statistics, encryption_descriptor) = split_statistics_by_encryption(&merged, encryption)?;

    Ok(proto::Footer {
        header_length: Some(header_length),
        content_length: Some(header_length + body_length),
        stripes: stripe_infos,
        types,
        metadata: build_user_metadata(user_metadata),
        number_of_rows: Some(number_of_rows),
        statistics,
        row_index_stride,
        encryption: encryption_descriptor,
        stripe_cache_offsets: stripe_cache_offsets.to_vec(),
    })
}

/// Builds the postscript. `metadata_length` is the serialized size of the
/// Metadata section ([`build_metadata_section`]'s output), which sits
/// between the last stripe and the footer.
///
/// `Postscript.stripe_statistics_length` carries the exact same "Metadata
/// section length" meaning per its own doc comment, so it's set to the same
/// value as `metadata_length` rather than left unset.
pub fn build_postscript(
    footer_length: u64,
    metadata_length: u64,
    compression: Option<CompressionConfig>,
    stripe_cache: Option<&DwrfStripeCacheData>,
) -> proto::PostScript {
    let (kind, block_size) = match compression {
        Some(config) => (
            proto::CompressionKind::from(config.kind),
            Some(config.block_size as u64),
        ),
        None => (proto::CompressionKind::None, None),
    };

    proto::PostScript {
        footer_length: Some(footer_length),
        compression: Some(kind.into()),
        compression_block_size: block_size,
        version: vec![0, 12],
        metadata_length: Some(metadata_length),
        writer_version: Some(WRITER_VERSION),
        stripe_statistics_length: Some(metadata_length),
        stripe_cache: stripe_cache.map(|cache| proto::DwrfStripeCache {
            mode: Some(proto::dwrf_stripe_cache::Mode::from(cache.mode).into()),
            length: Some(cache.bytes.len() as u64),
        }),
        magic: Some(String::from_utf8_lossy(MAGIC).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::datatypes::{Field, Schema};

    use super::*;
    use crate::reader::decompress::CompressionType;
    use crate::schema::flatten_arrow_schema;
    use crate::writer::stripe_cache::StripeCacheMode;

    fn closed_stripe(offset: u64, row_count: usize, node_count: usize) -> ClosedStripe {
        let statistics = (0..node_count)
            .map(|_| ColumnStatistics::new(row_count as u64, false, None))
            .collect();
        ClosedStripe {
            information: StripeInformation {
                start_offset: offset,
                index_length: 10,
                data_length: 100,
                footer_length: 20,
                row_count,
            },
            statistics,
        }
    }

    #[test]
    fn merges_row_counts_and_sums_body_length_across_stripes() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "id",
            ArrowDataType::Int32,
            false,
        )]));
        let nodes = flatten_arrow_schema(&schema).unwrap();
        let stripes = vec![
            closed_stripe(3, 5, nodes.len()),
            closed_stripe(133, 7, nodes.len()),
        ];

        let footer = build_footer(
            &nodes,
            &stripes,
            &HashMap::new(),
            None,
            &[],
            None,
            MAGIC.len() as u64,
        )
        .unwrap();

        assert_eq!(footer.number_of_rows, Some(12));
        assert_eq!(footer.content_length, Some(3 + 2 * (10 + 100 + 20)));
        assert_eq!(footer.types.len(), nodes.len());
        assert_eq!(footer.statistics[0].number_of_values, Some(12));
    }

    #[test]
    fn emits_user_metadata_items() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "id",
            ArrowDataType::Int32,
            false,
        )]));
        let nodes = flatten_arrow_schema(&schema).unwrap();
        let mut user_metadata = HashMap::new();
        user_metadata.insert("hive.acid.version".to_string(), "2".to_string());

        let footer = build_footer(&nodes, &[], &user_metadata, None, &[], None, 3).unwrap();
        assert_eq!(footer.metadata.len(), 1);
        assert_eq!(footer.metadata[0].name.as_deref(), Some("hive.acid.version"));
    }

    #[test]
    fn postscript_carries_compression_and_stripe_cache_descriptor() {
        let cache = DwrfStripeCacheData {
            mode: StripeCacheMode::Both,
            bytes: bytes::Bytes::from_static(b"cached"),
            offsets: vec![0, 6],
        };
        let postscript = build_postscript(
            1234,
            42,
            Some(CompressionConfig::new(CompressionType::Zstd, 256 * 1024)),
            Some(&cache),
        );

        assert_eq!(postscript.footer_length, Some(1234));
        assert_eq!(postscript.metadata_length, Some(42));
        assert_eq!(postscript.compression(), proto::CompressionKind::Zstd);
        assert_eq!(postscript.magic.as_deref(), Some("ORC"));
        let cache_descriptor = postscript.stripe_cache.unwrap();
        assert_eq!(cache_descriptor.length, Some(6));
    }

    #[test]
    fn postscript_without_compression_or_cache_has_none_kind() {
        let postscript = build_postscript(100, 0, None, None);
        assert_eq!(postscript.compression(), proto::CompressionKind::None);
        assert!(postscript.stripe_cache.is_none());
    }
}
