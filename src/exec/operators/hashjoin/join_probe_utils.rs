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
//! Utilities shared by the hash-join probe operator.
//!
//! Responsibilities:
//! - Trackers over monotone probe-row indices deciding per-row output for
//!   outer/semi variants with residual filters.
//! - Column shaping helpers for mapping-based probe projection.

use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::take;

/// Detects probe rows whose entire hit chain produced no passing result.
///
/// Fed `(probe_row, passed)` pairs in monotone probe-row order; when the probe
/// row changes (or the stream finishes) and the previous row never passed,
/// that row is reported as a miss to be emitted null-padded.
#[derive(Clone, Debug, Default)]
pub(crate) struct NoMatchDetector {
    current_row: Option<u32>,
    current_row_passed: bool,
}

impl NoMatchDetector {
    /// Returns the previous probe row iff it finished with no passing result.
    pub(crate) fn advance(&mut self, row: u32, passed: bool) -> Option<u32> {
        let mut miss = None;
        if self.current_row != Some(row) {
            if let Some(prev) = self.current_row {
                if !self.current_row_passed {
                    miss = Some(prev);
                }
            }
            self.current_row = Some(row);
            self.current_row_passed = false;
        }
        if passed {
            self.current_row_passed = true;
        }
        miss
    }

    /// Flush at end of the result cursor; resets for the next input batch.
    pub(crate) fn finish(&mut self) -> Option<u32> {
        let miss = match self.current_row {
            Some(row) if !self.current_row_passed => Some(row),
            _ => None,
        };
        self.current_row = None;
        self.current_row_passed = false;
        miss
    }
}

/// Emits each probe row at most once across all batches of its hit chain.
///
/// Fed probe rows of passing results in monotone order; a row is reported when
/// the stream moves past it (or finishes), so duplicate matches collapse.
#[derive(Clone, Debug, Default)]
pub(crate) struct LeftSemiJoinTracker {
    current_row: Option<u32>,
}

impl LeftSemiJoinTracker {
    /// Returns the previous probe row when a new one arrives.
    pub(crate) fn advance(&mut self, row: u32) -> Option<u32> {
        if self.current_row == Some(row) {
            return None;
        }
        let prev = self.current_row;
        self.current_row = Some(row);
        prev
    }

    /// Flush the trailing row at end of the result cursor.
    pub(crate) fn finish(&mut self) -> Option<u32> {
        self.current_row.take()
    }
}

/// Gather `array` values at `indices` (the row-number-mapping wrap).
pub(crate) fn take_indices(array: &ArrayRef, indices: &[u32]) -> Result<ArrayRef, String> {
    let index_array: ArrayRef = Arc::new(UInt32Array::from(indices.to_vec()));
    take(array.as_ref(), &index_array, None).map_err(|e| e.to_string())
}

/// Repeat the value of `array[row]` `len` times (constant wrap).
pub(crate) fn constant_at(array: &ArrayRef, row: usize, len: usize) -> Result<ArrayRef, String> {
    let index_array: ArrayRef = Arc::new(UInt32Array::from(vec![row as u32; len]));
    take(array.as_ref(), &index_array, None).map_err(|e| e.to_string())
}
