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

//! Maps node ids to encryption groups and owns the per-group data-encryption
//! keys, encrypted key metadata and encryptors a stripe needs to write its
//! encrypted streams and footer slices. Key derivation and the AEAD itself
//! are external collaborators (`KeyProvider`, `DataEncryptor`); this module
//! only owns the grouping and bookkeeping around them.

use std::collections::HashMap;

use snafu::{ensure, OptionExt};

use crate::error::{
    InvalidEncryptionGroupIndexSnafu, MissingEncryptionGroupSnafu, NonContiguousEncryptionGroupSnafu,
    Result,
};
use crate::schema::FlatNode;

/// Derives and wraps data-encryption keys. Implementations own whatever key
/// management service or local keystore holds the intermediate keys.
pub trait KeyProvider: Send + Sync {
    /// Generate a fresh data-encryption key for one encryption group, under
    /// the group's (opaque, user-supplied) intermediate key.
    fn generate_data_encryption_key(&self, intermediate_key: &[u8]) -> Result<Vec<u8>>;

    /// Wrap `dek` for storage in a stripe's encrypted-key metadata blob.
    /// `offset`/`length` identify where in the file the blob will live, and
    /// are bound into the ciphertext so a blob can't be replayed elsewhere.
    fn encrypt_key(
        &self,
        intermediate_key: &[u8],
        dek: &[u8],
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>>;
}

/// Encrypts a single group's payload (a serialized `StripeEncryptionGroup`,
/// or a group's encrypted file-statistics blob) under its data-encryption
/// key. Named for the DWRF reference encryptor that layers AEAD directly on
/// top of a stripe's compression output buffer.
pub trait DataEncryptor: Send + Sync {
    fn encrypt(&self, dek: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;
}

/// One disjoint, descendant-closed subtree of nodes sharing a single
/// data-encryption key.
pub struct EncryptionGroup {
    pub nodes: Vec<u32>,
    intermediate_key: Vec<u8>,
    data_encryption_key: Vec<u8>,
}

impl EncryptionGroup {
    pub fn nodes(&self) -> &[u32] {
        &self.nodes
    }
}

/// Owns every encryption group declared for a file: which nodes belong to
/// which group, each group's data-encryption key, and the shared encryptor
/// and key provider used to produce per-stripe ciphertext.
pub struct EncryptionInfo {
    groups: Vec<EncryptionGroup>,
    node_to_group: HashMap<u32, usize>,
    key_provider: Box<dyn KeyProvider>,
    encryptor: Box<dyn DataEncryptor>,
}

impl EncryptionInfo {
    /// `group_specs` pairs each group's full (root-and-every-descendant)
    /// node-id list with the opaque intermediate key it's encrypted under.
    /// `nodes` is the flattened type tree, used to check the "closed under
    /// descendants" invariant.
    pub fn new(
        group_specs: Vec<(Vec<u32>, Vec<u8>)>,
        nodes: &[FlatNode],
        key_provider: Box<dyn KeyProvider>,
        encryptor: Box<dyn DataEncryptor>,
    ) -> Result<Self> {
        let mut node_to_group = HashMap::new();
        for (group_idx, (group_nodes, _)) in group_specs.iter().enumerate() {
            for &node_id in group_nodes {
                node_to_group.insert(node_id, group_idx);
            }
        }

        for (group_idx, (group_nodes, _)) in group_specs.iter().enumerate() {
            for &node_id in group_nodes {
                for &child_id in &nodes[node_id as usize].children {
                    let child_group = node_to_group.get(&child_id).copied();
                    ensure!(
                        child_group == Some(group_idx),
                        NonContiguousEncryptionGroupSnafu {
                            group: group_idx,
                            node_id: child_id,
                        }
                    );
                }
            }
        }

        let mut groups = Vec::with_capacity(group_specs.len());
        for (group_nodes, intermediate_key) in group_specs {
            let data_encryption_key = key_provider.generate_data_encryption_key(&intermediate_key)?;
            groups.push(EncryptionGroup {
                nodes: group_nodes,
                intermediate_key,
                data_encryption_key,
            });
        }

        Ok(Self {
            groups,
            node_to_group,
            key_provider,
            encryptor,
        })
    }

    pub fn groups(&self) -> &[EncryptionGroup] {
        &self.groups
    }

    /// Which group (if any) owns `node_id`.
    pub fn group_for_node(&self, node_id: u32) -> Option<usize> {
        self.node_to_group.get(&node_id).copied()
    }

    /// Encrypt `plaintext` (a serialized `StripeEncryptionGroup`, or a
    /// group's subtree file statistics) under group `group_idx`'s key.
    pub fn encrypt_group_payload(&self, group_idx: usize, plaintext: &[u8]) -> Result<Vec<u8>> {
        let group = self.group(group_idx)?;
        self.encryptor.encrypt(&group.data_encryption_key, plaintext)
    }

    /// Produce the encrypted-key metadata blob a stripe stores for group
    /// `group_idx`, bound to where that blob will land in the file.
    pub fn encrypted_key_metadata(
        &self,
        group_idx: usize,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        let group = self.group(group_idx)?;
        self.key_provider.encrypt_key(
            &group.intermediate_key,
            &group.data_encryption_key,
            offset,
            length,
        )
    }

    fn group(&self, group_idx: usize) -> Result<&EncryptionGroup> {
        self.groups.get(group_idx).context(InvalidEncryptionGroupIndexSnafu {
            group_idx,
            group_count: self.groups.len(),
        })
    }
}

/// Looks up the encryption group for a node, producing the typed error the
/// stripe-assembly pipeline raises when a node was declared encrypted (by
/// being listed under a column's encryption config) but no group covers it.
pub fn require_group_for_node(info: &EncryptionInfo, node_id: u32) -> Result<usize> {
    info.group_for_node(node_id)
        .context(MissingEncryptionGroupSnafu { node_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FlatNode;
    use arrow::datatypes::DataType as ArrowDataType;

    struct XorKeyProvider;

    impl KeyProvider for XorKeyProvider {
        fn generate_data_encryption_key(&self, intermediate_key: &[u8]) -> Result<Vec<u8>> {
            Ok(intermediate_key.to_vec())
        }

        fn encrypt_key(
            &self,
            intermediate_key: &[u8],
            dek: &[u8],
            offset: u64,
            _length: u64,
        ) -> Result<Vec<u8>> {
            let mut out = dek.to_vec();
            for (i, byte) in out.iter_mut().enumerate() {
                *byte ^= intermediate_key[i % intermediate_key.len()] ^ (offset as u8);
            }
            Ok(out)
        }
    }

    struct XorEncryptor;

    impl DataEncryptor for XorEncryptor {
        fn encrypt(&self, dek: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
            Ok(plaintext
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ dek[i % dek.len()])
                .collect())
        }
    }

    fn leaf(id: u32) -> FlatNode {
        FlatNode {
            id,
            name: format!("n{id}"),
            arrow_type: ArrowDataType::Int64,
            children: vec![],
        }
    }

    fn nested_struct_nodes() -> Vec<FlatNode> {
        // node 0 (root struct) -> [1 (struct), 4]
        // node 1 (struct)      -> [2, 3]
        vec![
            FlatNode {
                id: 0,
                name: String::new(),
                arrow_type: ArrowDataType::Null,
                children: vec![1, 4],
            },
            FlatNode {
                id: 1,
                name: "inner".to_string(),
                arrow_type: ArrowDataType::Null,
                children: vec![2, 3],
            },
            leaf(2),
            leaf(3),
            leaf(4),
        ]
    }

    #[test]
    fn accepts_disjoint_descendant_closed_groups() {
        let nodes = nested_struct_nodes();
        let info = EncryptionInfo::new(
            vec![(vec![1, 2, 3], b"key-a".to_vec())],
            &nodes,
            Box::new(XorKeyProvider),
            Box::new(XorEncryptor),
        )
        .unwrap();

        assert_eq!(info.group_for_node(1), Some(0));
        assert_eq!(info.group_for_node(2), Some(0));
        assert_eq!(info.group_for_node(4), None);
    }

    #[test]
    fn rejects_group_missing_a_descendant() {
        let nodes = nested_struct_nodes();
        // Group lists node 1 but omits its child 3.
        let result = EncryptionInfo::new(
            vec![(vec![1, 2], b"key-a".to_vec())],
            &nodes,
            Box::new(XorKeyProvider),
            Box::new(XorEncryptor),
        );
        assert!(result.is_err());
    }

    #[test]
    fn round_trips_group_payload_encryption() {
        let nodes = nested_struct_nodes();
        let info = EncryptionInfo::new(
            vec![(vec![1, 2, 3], b"key-a".to_vec())],
            &nodes,
            Box::new(XorKeyProvider),
            Box::new(XorEncryptor),
        )
        .unwrap();

        let plaintext = b"stripe encryption group payload";
        let ciphertext = info.encrypt_group_payload(0, plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);

        // XOR is its own inverse, so encrypting the ciphertext again with
        // the same key recovers the plaintext -- enough to prove the dek
        // is being threaded through consistently without a real AEAD crate.
        let dek = &info.groups()[0].data_encryption_key;
        let decrypted: Vec<u8> = ciphertext
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ dek[i % dek.len()])
            .collect();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn missing_group_for_node_is_a_typed_error() {
        let nodes = nested_struct_nodes();
        let info = EncryptionInfo::new(
            vec![(vec![1, 2, 3], b"key-a".to_vec())],
            &nodes,
            Box::new(XorKeyProvider),
            Box::new(XorEncryptor),
        )
        .unwrap();

        assert!(require_group_for_node(&info, 4).is_err());
        assert!(require_group_for_node(&info, 1).is_ok());
    }
}
