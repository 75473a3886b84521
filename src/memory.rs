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

//! Estimating in-memory footprint of buffered, not-yet-flushed writer state.
//!
//! Used by the flush policy to decide when a stripe has grown too large, and
//! by the dictionary optimizer to decide when dictionary memory is under
//! pressure, without requiring an actual allocation walk.

/// Implemented by anything holding buffered bytes that haven't been flushed
/// to a [`crate::sink::Sink`] yet.
pub trait EstimateMemory {
    /// Estimated size in bytes of memory buffered by `self`. Should be cheap
    /// to call repeatedly (e.g. a running counter), not a deep traversal.
    fn estimate_memory_size(&self) -> usize;
}

impl<T: EstimateMemory> EstimateMemory for Vec<T> {
    fn estimate_memory_size(&self) -> usize {
        self.iter().map(EstimateMemory::estimate_memory_size).sum()
    }
}

impl<T: EstimateMemory> EstimateMemory for Option<T> {
    fn estimate_memory_size(&self) -> usize {
        self.as_ref().map_or(0, EstimateMemory::estimate_memory_size)
    }
}
