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
//! Hash-table primitives for join key indexing.
//!
//! Responsibilities:
//! - Buckets build rows by key into per-key reference chains, either by exact
//!   composite value id or by mixed hash with serialized-key verification.
//! - Fills probe hit chains for a batch lookup and enumerates (probe row,
//!   build row) result pairs through a monotone cursor.

use arrow::array::ArrayRef;
use arrow::row::{OwnedRow, RowConverter, Rows, SortField};
use hashbrown::HashMap;

use super::key_hasher::{HashMode, KeyHasher};
use super::row_container::{BuildRowId, ROW_NONE, RowContainer};
use crate::exec::chunk::Chunk;

/// Per-batch probe state: parallel arrays indexed by probe row position.
#[derive(Default)]
pub(crate) struct HashLookup {
    /// Composite value id (value-id mode) or mixed hash (hash mode) per row.
    pub hashes: Vec<u64>,
    /// Probe row positions submitted to (or extended after) the probe.
    pub rows: Vec<u32>,
    /// Head of the matching build-row chain per probe row, ROW_NONE on miss.
    pub hits: Vec<BuildRowId>,
    /// Serialized probe key rows for hash-mode equality verification.
    pub key_rows: Option<Rows>,
}

/// Cursor over join results for one probe batch.
///
/// Strictly monotone in (probe row position, chain position); survives across
/// output batches of a single input.
#[derive(Clone, Debug, Default)]
pub(crate) struct JoinResultIterator {
    row_pos: usize,
    next_chain: Option<BuildRowId>,
    at_end: bool,
}

impl JoinResultIterator {
    pub(crate) fn reset(&mut self) {
        self.row_pos = 0;
        self.next_chain = None;
        self.at_end = false;
    }

    pub(crate) fn at_end(&self) -> bool {
        self.at_end
    }

    /// Mark the cursor exhausted without walking it; used by probe paths that
    /// bypass chain enumeration (e.g. empty build side) so trackers flush.
    pub(crate) fn mark_at_end(&mut self) {
        self.at_end = true;
    }
}

struct JoinGroup {
    head: BuildRowId,
    num_rows: u32,
    /// Serialized key bytes; present in hash mode only.
    key: Option<OwnedRow>,
}

/// Read-only (after build) hash table shared by all probe drivers of one join.
pub struct JoinHashTable {
    mode: HashMode,
    hashers: Vec<KeyHasher>,
    container: RowContainer,
    groups: Vec<JoinGroup>,
    row_next: Vec<BuildRowId>,
    value_buckets: HashMap<u64, u32>,
    hash_buckets: HashMap<u64, Vec<u32>>,
    key_converter: Option<RowConverter>,
    hash_seed: u64,
    /// Semi/anti joins without a residual filter keep one row per key.
    drop_duplicates: bool,
    has_duplicate_keys: bool,
    has_null_build_key: bool,
}

impl JoinHashTable {
    pub(crate) fn new(
        container: RowContainer,
        hashers: Vec<KeyHasher>,
        mode: HashMode,
        hash_seed: u64,
        drop_duplicates: bool,
    ) -> Result<Self, String> {
        if hashers.is_empty() {
            return Err("join hash table requires join keys".to_string());
        }
        if hashers.len() != container.key_channels().len() {
            return Err(format!(
                "join hasher count mismatch: hashers={} key_channels={}",
                hashers.len(),
                container.key_channels().len()
            ));
        }
        let key_converter = match mode {
            HashMode::Hash => {
                let fields = container
                    .key_types()
                    .into_iter()
                    .map(SortField::new)
                    .collect::<Vec<_>>();
                Some(RowConverter::new(fields).map_err(|e| e.to_string())?)
            }
            HashMode::ValueId => None,
        };
        Ok(Self {
            mode,
            hashers,
            container,
            groups: Vec::new(),
            row_next: Vec::new(),
            value_buckets: HashMap::new(),
            hash_buckets: HashMap::new(),
            key_converter,
            hash_seed,
            drop_duplicates,
            has_duplicate_keys: false,
            has_null_build_key: false,
        })
    }

    pub(crate) fn hash_mode(&self) -> HashMode {
        self.mode
    }

    pub(crate) fn hashers(&self) -> &[KeyHasher] {
        &self.hashers
    }

    pub(crate) fn rows(&self) -> &RowContainer {
        &self.container
    }

    /// Number of distinct build key tuples.
    pub fn num_distinct(&self) -> usize {
        self.groups.len()
    }

    pub fn has_duplicate_keys(&self) -> bool {
        self.has_duplicate_keys
    }

    pub(crate) fn has_null_build_key(&self) -> bool {
        self.has_null_build_key
    }

    pub(crate) fn hash_seed(&self) -> u64 {
        self.hash_seed
    }

    /// Serialize probe key columns with the table's converter for hash-mode
    /// bucket verification.
    pub(crate) fn convert_probe_keys(&self, key_arrays: &[ArrayRef]) -> Result<Rows, String> {
        let converter = self
            .key_converter
            .as_ref()
            .ok_or_else(|| "key serialization requested in value-id mode".to_string())?;
        converter.convert_columns(key_arrays).map_err(|e| e.to_string())
    }

    /// Index one build batch: rows with fully non-null keys join a key chain;
    /// null-keyed rows stay in the container but match nothing.
    pub(crate) fn add_build_chunk(&mut self, chunk: Chunk) -> Result<(), String> {
        let num_rows = chunk.len();
        let mut key_arrays = Vec::with_capacity(self.container.key_channels().len());
        for &channel in self.container.key_channels() {
            let column = chunk
                .columns()
                .get(channel)
                .cloned()
                .ok_or_else(|| format!("build chunk misses key column {}", channel))?;
            key_arrays.push(column);
        }
        let base = self.container.add_batch(chunk)?;
        self.row_next
            .resize(base as usize + num_rows, ROW_NONE);
        if num_rows == 0 {
            return Ok(());
        }

        let mut non_null = vec![true; num_rows];
        for array in &key_arrays {
            if let Some(nulls) = array.logical_nulls() {
                for row in 0..num_rows {
                    if nulls.is_null(row) {
                        non_null[row] = false;
                    }
                }
            }
        }
        if non_null.iter().any(|v| !*v) {
            self.has_null_build_key = true;
        }

        let mut hashes = vec![0u64; num_rows];
        let mut active = non_null.clone();
        match self.mode {
            HashMode::ValueId => {
                for (i, hasher) in self.hashers.iter().enumerate() {
                    hasher.lookup_value_ids(&key_arrays[i], &mut active, &mut hashes, i > 0)?;
                }
                // Build values were all observed by the hashers; a missing
                // mapping here means the table was assembled out of order.
                for row in 0..num_rows {
                    if non_null[row] && !active[row] {
                        return Err("build key missing from value-id mapping".to_string());
                    }
                }
                for row in 0..num_rows {
                    if !non_null[row] {
                        continue;
                    }
                    let group = match self.value_buckets.get(&hashes[row]) {
                        Some(g) => *g,
                        None => {
                            let g = self.push_group(None)?;
                            self.value_buckets.insert(hashes[row], g);
                            g
                        }
                    };
                    self.link_row(group, base + row as u32)?;
                }
            }
            HashMode::Hash => {
                for (i, hasher) in self.hashers.iter().enumerate() {
                    hasher.hash_column(&key_arrays[i], &active, &mut hashes, i > 0, self.hash_seed)?;
                }
                let key_rows = self.convert_probe_keys(&key_arrays)?;
                for row in 0..num_rows {
                    if !non_null[row] {
                        continue;
                    }
                    let group = self.find_or_insert_hash_group(hashes[row], &key_rows, row)?;
                    self.link_row(group, base + row as u32)?;
                }
            }
        }
        Ok(())
    }

    fn push_group(&mut self, key: Option<OwnedRow>) -> Result<u32, String> {
        let id = u32::try_from(self.groups.len())
            .map_err(|_| "join group count overflow".to_string())?;
        self.groups.push(JoinGroup {
            head: ROW_NONE,
            num_rows: 0,
            key,
        });
        Ok(id)
    }

    fn find_or_insert_hash_group(
        &mut self,
        hash: u64,
        key_rows: &Rows,
        row: usize,
    ) -> Result<u32, String> {
        if let Some(candidates) = self.hash_buckets.get(&hash) {
            for &g in candidates {
                let group_key = self.groups[g as usize]
                    .key
                    .as_ref()
                    .ok_or_else(|| "hash-mode group missing serialized key".to_string())?;
                if group_key.row() == key_rows.row(row) {
                    return Ok(g);
                }
            }
        }
        let g = self.push_group(Some(key_rows.row(row).owned()))?;
        self.hash_buckets.entry(hash).or_default().push(g);
        Ok(g)
    }

    fn link_row(&mut self, group: u32, row_id: BuildRowId) -> Result<(), String> {
        let entry = self
            .groups
            .get_mut(group as usize)
            .ok_or_else(|| "join group id out of bounds".to_string())?;
        if self.drop_duplicates && entry.num_rows > 0 {
            return Ok(());
        }
        let slot = row_id as usize;
        if slot >= self.row_next.len() {
            return Err("join row id out of bounds".to_string());
        }
        self.row_next[slot] = entry.head;
        entry.head = row_id;
        entry.num_rows += 1;
        if entry.num_rows > 1 {
            self.has_duplicate_keys = true;
        }
        Ok(())
    }

    /// Fill `lookup.hits` for every position in `lookup.rows`.
    pub(crate) fn probe(&self, lookup: &mut HashLookup) -> Result<(), String> {
        for &r in &lookup.rows {
            let slot = r as usize;
            let hash = *lookup
                .hashes
                .get(slot)
                .ok_or_else(|| "probe hash out of bounds".to_string())?;
            let group = match self.mode {
                HashMode::ValueId => self.value_buckets.get(&hash).copied(),
                HashMode::Hash => {
                    let key_rows = lookup
                        .key_rows
                        .as_ref()
                        .ok_or_else(|| "hash-mode probe requires serialized keys".to_string())?;
                    let probe_key = key_rows.row(slot);
                    self.hash_buckets.get(&hash).and_then(|candidates| {
                        candidates.iter().copied().find(|g| {
                            self.groups[*g as usize]
                                .key
                                .as_ref()
                                .map(|k| k.row() == probe_key)
                                .unwrap_or(false)
                        })
                    })
                }
            };
            let hit = group
                .map(|g| self.groups[g as usize].head)
                .unwrap_or(ROW_NONE);
            let hit_slot = r as usize;
            if hit_slot >= lookup.hits.len() {
                return Err("probe hit buffer too small".to_string());
            }
            lookup.hits[hit_slot] = hit;
        }
        Ok(())
    }

    /// Walk up to `max` (probe row, build row) pairs from the cursor.
    ///
    /// With `include_misses`, a probe row whose chain is empty produces exactly
    /// one pair with ROW_NONE. Returns the number of pairs appended to
    /// `mapping`/`out_rows` (both are cleared first).
    pub(crate) fn list_join_results(
        &self,
        iter: &mut JoinResultIterator,
        lookup: &HashLookup,
        include_misses: bool,
        max: usize,
        mapping: &mut Vec<u32>,
        out_rows: &mut Vec<BuildRowId>,
    ) -> Result<usize, String> {
        mapping.clear();
        out_rows.clear();
        if max == 0 {
            return Err("join result batch size must be positive".to_string());
        }
        while mapping.len() < max && iter.row_pos < lookup.rows.len() {
            let probe_row = lookup.rows[iter.row_pos];
            let chain = match iter.next_chain {
                Some(c) => c,
                None => {
                    let slot = probe_row as usize;
                    *lookup
                        .hits
                        .get(slot)
                        .ok_or_else(|| "probe hit out of bounds".to_string())?
                }
            };
            if chain == ROW_NONE {
                if iter.next_chain.is_none() && include_misses {
                    mapping.push(probe_row);
                    out_rows.push(ROW_NONE);
                }
                iter.row_pos += 1;
                iter.next_chain = None;
                continue;
            }
            mapping.push(probe_row);
            out_rows.push(chain);
            let next = self.row_next[chain as usize];
            if next == ROW_NONE {
                iter.row_pos += 1;
                iter.next_chain = None;
            } else {
                iter.next_chain = Some(next);
            }
        }
        if iter.row_pos >= lookup.rows.len() {
            iter.at_end = true;
        }
        Ok(mapping.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ids::SlotId;
    use crate::exec::chunk::field_with_slot_id;
    use arrow::array::{Array, Int32Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn build_table(mode: HashMode, keys: Vec<Option<i32>>) -> JoinHashTable {
        let schema = Arc::new(Schema::new(vec![field_with_slot_id(
            Field::new("k", DataType::Int32, true),
            SlotId::new(1),
        )]));
        let mut hasher = KeyHasher::new(0, DataType::Int32).unwrap();
        let array: ArrayRef = Arc::new(Int32Array::from(keys.clone()));
        hasher.observe_build_column(&array).unwrap();
        let container = RowContainer::new(Arc::clone(&schema), vec![0]).unwrap();
        let mut table = JoinHashTable::new(container, vec![hasher], mode, 17, false).unwrap();
        let batch = RecordBatch::try_new(schema, vec![array]).unwrap();
        table.add_build_chunk(Chunk::new(batch)).unwrap();
        table
    }

    fn probe_lookup(table: &JoinHashTable, keys: Vec<Option<i32>>) -> HashLookup {
        let array: ArrayRef = Arc::new(Int32Array::from(keys.clone()));
        let n = keys.len();
        let mut lookup = HashLookup::default();
        lookup.hashes = vec![0u64; n];
        let mut active = (0..n).map(|i| !array.is_null(i)).collect::<Vec<_>>();
        match table.hash_mode() {
            HashMode::ValueId => {
                table.hashers()[0]
                    .lookup_value_ids(&array, &mut active, &mut lookup.hashes, false)
                    .unwrap();
            }
            HashMode::Hash => {
                table.hashers()[0]
                    .hash_column(&array, &active, &mut lookup.hashes, false, table.hash_seed())
                    .unwrap();
                lookup.key_rows = Some(table.convert_probe_keys(&[array]).unwrap());
            }
        }
        lookup.rows = (0..n as u32).filter(|r| active[*r as usize]).collect();
        lookup.hits = vec![ROW_NONE; n];
        table.probe(&mut lookup).unwrap();
        lookup
    }

    fn drain_results(
        table: &JoinHashTable,
        lookup: &HashLookup,
        include_misses: bool,
        max: usize,
    ) -> Vec<(u32, Option<u32>)> {
        let mut iter = JoinResultIterator::default();
        let mut mapping = Vec::new();
        let mut out_rows = Vec::new();
        let mut pairs = Vec::new();
        loop {
            let n = table
                .list_join_results(&mut iter, lookup, include_misses, max, &mut mapping, &mut out_rows)
                .unwrap();
            if n == 0 {
                break;
            }
            for i in 0..n {
                let build = if out_rows[i] == ROW_NONE {
                    None
                } else {
                    Some(out_rows[i])
                };
                pairs.push((mapping[i], build));
            }
        }
        assert!(iter.at_end());
        pairs
    }

    #[test]
    fn duplicate_keys_enumerate_whole_chain() {
        for mode in [HashMode::ValueId, HashMode::Hash] {
            let table = build_table(mode, vec![Some(1), Some(2), Some(2)]);
            assert_eq!(table.num_distinct(), 2);
            assert!(table.has_duplicate_keys());

            let lookup = probe_lookup(&table, vec![Some(2), Some(3)]);
            let pairs = drain_results(&table, &lookup, false, 16);
            let mut rows: Vec<u32> = pairs.iter().map(|(_, b)| b.unwrap()).collect();
            rows.sort();
            assert_eq!(pairs.iter().map(|(p, _)| *p).collect::<Vec<_>>(), vec![0, 0]);
            assert_eq!(rows, vec![1, 2]);
        }
    }

    #[test]
    fn misses_synthesized_once_per_probe_row() {
        let table = build_table(HashMode::ValueId, vec![Some(1)]);
        let mut lookup = probe_lookup(&table, vec![Some(5), Some(1), Some(6)]);
        // Outer variants extend rows to the identity range after probing.
        lookup.rows = vec![0, 1, 2];
        let pairs = drain_results(&table, &lookup, true, 2);
        assert_eq!(
            pairs,
            vec![(0, None), (1, Some(0)), (2, None)]
        );
    }

    #[test]
    fn cursor_resumes_across_small_batches() {
        let table = build_table(HashMode::Hash, vec![Some(7), Some(7), Some(7)]);
        let lookup = probe_lookup(&table, vec![Some(7), Some(7)]);
        let pairs = drain_results(&table, &lookup, false, 2);
        assert_eq!(pairs.len(), 6);
        // Monotone in probe row.
        for w in pairs.windows(2) {
            assert!(w[0].0 <= w[1].0);
        }
    }
}
