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
//! Exact-value IN runtime filters.
//!
//! Responsibilities:
//! - Stores typed IN-filter values and probes rows via exact set-membership
//!   semantics.
//! - Applied by upstream operators to drop probe rows that cannot match any
//!   build-side key.

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Int32Array, Int64Array, StringArray,
};
use arrow::compute::filter_record_batch;
use hashbrown::HashSet;

use crate::common::ids::SlotId;
use crate::exec::chunk::Chunk;

#[derive(Clone, Debug)]
pub enum RuntimeInFilterValues {
    Int32(HashSet<i32>),
    Int64(HashSet<i64>),
    Date32(HashSet<i32>),
    Utf8(HashSet<String>),
}

/// Typed IN runtime filter holding the exact candidate values for one slot.
#[derive(Clone, Debug)]
pub struct RuntimeInFilter {
    slot_id: SlotId,
    values: RuntimeInFilterValues,
    nulls_allowed: bool,
}

impl RuntimeInFilter {
    pub fn new(slot_id: SlotId, values: RuntimeInFilterValues, nulls_allowed: bool) -> Self {
        Self {
            slot_id,
            values,
            nulls_allowed,
        }
    }

    pub fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    pub fn num_values(&self) -> usize {
        match &self.values {
            RuntimeInFilterValues::Int32(v) | RuntimeInFilterValues::Date32(v) => v.len(),
            RuntimeInFilterValues::Int64(v) => v.len(),
            RuntimeInFilterValues::Utf8(v) => v.len(),
        }
    }

    /// Membership of each row of `array` in the filter value set.
    pub fn matches(&self, array: &ArrayRef) -> Result<Vec<bool>, String> {
        let len = array.len();
        let mut keep = vec![false; len];
        for row in 0..len {
            if array.is_null(row) {
                keep[row] = self.nulls_allowed;
                continue;
            }
            keep[row] = match &self.values {
                RuntimeInFilterValues::Int32(v) => {
                    let arr = array
                        .as_any()
                        .downcast_ref::<Int32Array>()
                        .ok_or_else(|| "runtime filter expects Int32 column".to_string())?;
                    v.contains(&arr.value(row))
                }
                RuntimeInFilterValues::Date32(v) => {
                    let arr = array
                        .as_any()
                        .downcast_ref::<Date32Array>()
                        .ok_or_else(|| "runtime filter expects Date32 column".to_string())?;
                    v.contains(&arr.value(row))
                }
                RuntimeInFilterValues::Int64(v) => {
                    let arr = array
                        .as_any()
                        .downcast_ref::<Int64Array>()
                        .ok_or_else(|| "runtime filter expects Int64 column".to_string())?;
                    v.contains(&arr.value(row))
                }
                RuntimeInFilterValues::Utf8(v) => {
                    let arr = array
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .ok_or_else(|| "runtime filter expects Utf8 column".to_string())?;
                    v.contains(arr.value(row))
                }
            };
        }
        Ok(keep)
    }

    /// Drop chunk rows whose filtered column has no build-side counterpart.
    /// Returns None when nothing survives.
    pub fn filter_chunk(&self, chunk: Chunk) -> Result<Option<Chunk>, String> {
        if chunk.is_empty() {
            return Ok(Some(chunk));
        }
        let column = chunk.column_by_slot_id(self.slot_id)?;
        let keep = self.matches(&column)?;
        if keep.iter().all(|v| *v) {
            return Ok(Some(chunk));
        }
        if keep.iter().all(|v| !*v) {
            return Ok(None);
        }
        let mask = BooleanArray::from(keep);
        let filtered = filter_record_batch(&chunk.batch, &mask).map_err(|e| e.to_string())?;
        Ok(Some(Chunk::new(filtered)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::chunk::field_with_slot_id;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    #[test]
    fn filters_rows_outside_value_set() {
        let mut values = HashSet::new();
        values.insert(1);
        values.insert(3);
        let filter = RuntimeInFilter::new(
            SlotId::new(5),
            RuntimeInFilterValues::Int32(values),
            false,
        );

        let schema = Arc::new(Schema::new(vec![field_with_slot_id(
            Field::new("k", DataType::Int32, true),
            SlotId::new(5),
        )]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int32Array::from(vec![
                Some(1),
                Some(2),
                None,
                Some(3),
            ]))],
        )
        .unwrap();

        let out = filter.filter_chunk(Chunk::new(batch)).unwrap().unwrap();
        let col = out.columns()[0]
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(col.value(0), 1);
        assert_eq!(col.value(1), 3);
    }
}
