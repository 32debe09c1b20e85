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
//! Flat storage for build-side rows.
//!
//! Responsibilities:
//! - Addresses every build row by an opaque 32-bit id and extracts columns for
//!   arbitrary id sets, with null backing for miss sentinels.
//! - Stores the per-row probed flag as a set-once atomic bit, safe under
//!   concurrent probe drivers.
//! - Enumerates all/probed/not-probed rows through a resumable iterator.

use std::sync::atomic::{AtomicU64, Ordering};

use arrow::array::{Array, ArrayRef, new_null_array};
use arrow::compute::interleave;
use arrow::datatypes::{DataType, SchemaRef};

use crate::exec::chunk::Chunk;

/// Opaque handle to one build row.
pub(crate) type BuildRowId = u32;

/// Miss sentinel: an output row with no matching build row.
pub(crate) const ROW_NONE: BuildRowId = u32::MAX;

/// Resumable cursor over container rows.
#[derive(Clone, Debug, Default)]
pub(crate) struct RowContainerIterator {
    next_row: u32,
}

/// Columnar container of build-side batches with stable row ids.
#[derive(Debug)]
pub(crate) struct RowContainer {
    schema: SchemaRef,
    key_channels: Vec<usize>,
    batches: Vec<Chunk>,
    row_batch_index: Vec<u32>,
    row_in_batch: Vec<u32>,
    probed: Vec<AtomicU64>,
    null_rows: Vec<ArrayRef>,
}

impl RowContainer {
    pub(crate) fn new(schema: SchemaRef, key_channels: Vec<usize>) -> Result<Self, String> {
        for channel in &key_channels {
            if *channel >= schema.fields().len() {
                return Err(format!(
                    "build key channel {} out of bounds (build columns: {})",
                    channel,
                    schema.fields().len()
                ));
            }
        }
        let null_rows = schema
            .fields()
            .iter()
            .map(|f| new_null_array(f.data_type(), 1))
            .collect();
        Ok(Self {
            schema,
            key_channels,
            batches: Vec::new(),
            row_batch_index: Vec::new(),
            row_in_batch: Vec::new(),
            probed: Vec::new(),
            null_rows,
        })
    }

    pub(crate) fn key_channels(&self) -> &[usize] {
        &self.key_channels
    }

    pub(crate) fn key_types(&self) -> Vec<DataType> {
        self.key_channels
            .iter()
            .map(|ch| self.schema.field(*ch).data_type().clone())
            .collect()
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.row_batch_index.len()
    }

    /// Append one batch; returns the id of its first row.
    pub(crate) fn add_batch(&mut self, chunk: Chunk) -> Result<BuildRowId, String> {
        let num_rows = chunk.len();
        let base = self.row_batch_index.len();
        let next = base
            .checked_add(num_rows)
            .filter(|n| *n < ROW_NONE as usize)
            .ok_or_else(|| "join build row count overflow".to_string())?;
        let batch_index = u32::try_from(self.batches.len())
            .map_err(|_| "join build batch count overflow".to_string())?;
        self.row_batch_index.resize(next, batch_index);
        self.row_in_batch.reserve(num_rows);
        for row in 0..num_rows {
            self.row_in_batch.push(row as u32);
        }
        while self.probed.len() * 64 < next {
            self.probed.push(AtomicU64::new(0));
        }
        self.batches.push(chunk);
        Ok(base as BuildRowId)
    }

    /// Extract `channel` values for the given row ids; ROW_NONE entries yield null.
    pub(crate) fn extract_column(
        &self,
        rows: &[BuildRowId],
        channel: usize,
    ) -> Result<ArrayRef, String> {
        let null_row = self
            .null_rows
            .get(channel)
            .ok_or_else(|| format!("build column {} out of bounds", channel))?;
        if self.batches.is_empty() {
            return Ok(new_null_array(null_row.data_type(), rows.len()));
        }
        let mut values: Vec<&dyn Array> = Vec::with_capacity(self.batches.len() + 1);
        for batch in &self.batches {
            let column = batch
                .columns()
                .get(channel)
                .ok_or_else(|| format!("build column {} out of bounds", channel))?;
            values.push(column.as_ref());
        }
        values.push(null_row.as_ref());
        let null_slot = self.batches.len();

        let mut indices = Vec::with_capacity(rows.len());
        for &row in rows {
            if row == ROW_NONE {
                indices.push((null_slot, 0));
                continue;
            }
            let slot = row as usize;
            let batch_index = *self
                .row_batch_index
                .get(slot)
                .ok_or_else(|| "join row id out of bounds".to_string())?;
            indices.push((batch_index as usize, self.row_in_batch[slot] as usize));
        }
        interleave(&values, &indices).map_err(|e| e.to_string())
    }

    /// Set the probed flag on the given rows; ROW_NONE entries are skipped.
    /// The flag is a monotonic set-once bit, safe under concurrent probers.
    pub(crate) fn set_probed_flags(&self, rows: &[BuildRowId]) {
        for &row in rows {
            if row == ROW_NONE {
                continue;
            }
            let slot = row as usize;
            if slot >= self.row_batch_index.len() {
                continue;
            }
            self.probed[slot / 64].fetch_or(1u64 << (slot % 64), Ordering::AcqRel);
        }
    }

    pub(crate) fn is_probed(&self, row: BuildRowId) -> bool {
        let slot = row as usize;
        self.probed[slot / 64].load(Ordering::Acquire) & (1u64 << (slot % 64)) != 0
    }

    /// List up to `max` rows starting at the iterator, regardless of flags.
    pub(crate) fn list_rows(
        &self,
        iter: &mut RowContainerIterator,
        max: usize,
        out: &mut Vec<BuildRowId>,
    ) -> usize {
        self.list_rows_filtered(iter, max, out, |_| true)
    }

    pub(crate) fn list_probed_rows(
        &self,
        iter: &mut RowContainerIterator,
        max: usize,
        out: &mut Vec<BuildRowId>,
    ) -> usize {
        self.list_rows_filtered(iter, max, out, |row| self.is_probed(row))
    }

    pub(crate) fn list_not_probed_rows(
        &self,
        iter: &mut RowContainerIterator,
        max: usize,
        out: &mut Vec<BuildRowId>,
    ) -> usize {
        self.list_rows_filtered(iter, max, out, |row| !self.is_probed(row))
    }

    fn list_rows_filtered(
        &self,
        iter: &mut RowContainerIterator,
        max: usize,
        out: &mut Vec<BuildRowId>,
        keep: impl Fn(BuildRowId) -> bool,
    ) -> usize {
        out.clear();
        let total = self.num_rows() as u32;
        while iter.next_row < total && out.len() < max {
            let row = iter.next_row;
            iter.next_row += 1;
            if keep(row) {
                out.push(row);
            }
        }
        out.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ids::SlotId;
    use crate::exec::chunk::field_with_slot_id;
    use arrow::array::{Int32Array, RecordBatch, StringArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn container_with_two_batches() -> RowContainer {
        let schema = Arc::new(Schema::new(vec![
            field_with_slot_id(Field::new("k", DataType::Int32, true), SlotId::new(1)),
            field_with_slot_id(Field::new("v", DataType::Utf8, true), SlotId::new(2)),
        ]));
        let mut container = RowContainer::new(Arc::clone(&schema), vec![0]).unwrap();
        let b1 = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![
                Arc::new(Int32Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec!["a", "b"])),
            ],
        )
        .unwrap();
        let b2 = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![3])),
                Arc::new(StringArray::from(vec!["c"])),
            ],
        )
        .unwrap();
        container.add_batch(Chunk::new(b1)).unwrap();
        container.add_batch(Chunk::new(b2)).unwrap();
        container
    }

    #[test]
    fn extract_spans_batches_and_backs_misses_with_null() {
        let container = container_with_two_batches();
        let out = container.extract_column(&[2, ROW_NONE, 0], 1).unwrap();
        let out = out.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(out.value(0), "c");
        assert!(out.is_null(1));
        assert_eq!(out.value(2), "a");
    }

    #[test]
    fn probed_flag_partitions_listing() {
        let container = container_with_two_batches();
        container.set_probed_flags(&[1, ROW_NONE]);

        let mut iter = RowContainerIterator::default();
        let mut out = Vec::new();
        let n = container.list_probed_rows(&mut iter, 16, &mut out);
        assert_eq!(n, 1);
        assert_eq!(out, vec![1]);

        let mut iter = RowContainerIterator::default();
        let n = container.list_not_probed_rows(&mut iter, 16, &mut out);
        assert_eq!(n, 2);
        assert_eq!(out, vec![0, 2]);
    }

    #[test]
    fn listing_resumes_from_iterator_position() {
        let container = container_with_two_batches();
        let mut iter = RowContainerIterator::default();
        let mut out = Vec::new();
        assert_eq!(container.list_rows(&mut iter, 2, &mut out), 2);
        assert_eq!(out, vec![0, 1]);
        assert_eq!(container.list_rows(&mut iter, 2, &mut out), 1);
        assert_eq!(out, vec![2]);
        assert_eq!(container.list_rows(&mut iter, 2, &mut out), 0);
    }
}
