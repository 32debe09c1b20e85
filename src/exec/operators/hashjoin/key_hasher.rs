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
//! Per-key hashers for join key indexing.
//!
//! Responsibilities:
//! - Normalizes and hashes one key column, with seeded mixing across keys.
//! - Assigns dense value ids to build-side key values while the distinct set
//!   stays small; probe-side lookups translate values back to ids and deselect
//!   rows the build side never saw.
//! - Derives exact IN runtime filters from the observed build value set.

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int8Array, Int16Array,
    Int32Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, TimeUnit};
use hashbrown::{HashMap, HashSet};

use crate::common::ids::SlotId;
use crate::exec::runtime_filter::{RuntimeInFilter, RuntimeInFilterValues};

/// Hash table addressing mode.
///
/// In value-id mode every distinct build key tuple maps to a dense composite id
/// and bucket lookups are exact; in hash mode buckets are keyed by a mixed hash
/// and candidates verify against serialized key rows.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HashMode {
    ValueId,
    Hash,
}

/// Distinct-value cap before a hasher abandons value-id assignment.
const MAX_VALUE_ID_DISTINCT: usize = 10_000;

pub(crate) fn combine_hash(acc: u64, value_hash: u64) -> u64 {
    acc ^ value_hash
        .wrapping_add(0x9e3779b97f4a7c15)
        .wrapping_add(acc << 6)
        .wrapping_add(acc >> 2)
}

pub(crate) fn hash_u64_with_seed(seed: u64, value: u64) -> u64 {
    mix_u64(seed ^ value)
}

pub(crate) fn hash_bytes_with_seed(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn canonical_f64_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

fn mix_u64(mut value: u64) -> u64 {
    value = value.wrapping_add(0x9e3779b97f4a7c15);
    value = (value ^ (value >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    value = (value ^ (value >> 27)).wrapping_mul(0x94d049bb133111eb);
    value ^ (value >> 31)
}

/// Value-id assignment for one key column while the distinct set is small.
#[derive(Clone, Debug)]
enum ValueIdMap {
    Int(HashMap<i64, u64>),
    Utf8(HashMap<String, u64>),
}

impl ValueIdMap {
    fn len(&self) -> usize {
        match self {
            Self::Int(m) => m.len(),
            Self::Utf8(m) => m.len(),
        }
    }
}

/// Hasher for one join key column.
#[derive(Clone, Debug)]
pub(crate) struct KeyHasher {
    channel: usize,
    data_type: DataType,
    value_ids: Option<ValueIdMap>,
}

fn int_value_at(array: &ArrayRef, row: usize) -> Result<Option<i64>, String> {
    if array.is_null(row) {
        return Ok(None);
    }
    let v = match array.data_type() {
        DataType::Boolean => {
            let arr = downcast::<BooleanArray>(array)?;
            arr.value(row) as i64
        }
        DataType::Int8 => downcast::<Int8Array>(array)?.value(row) as i64,
        DataType::Int16 => downcast::<Int16Array>(array)?.value(row) as i64,
        DataType::Int32 => downcast::<Int32Array>(array)?.value(row) as i64,
        DataType::Int64 => downcast::<Int64Array>(array)?.value(row),
        DataType::Date32 => downcast::<Date32Array>(array)?.value(row) as i64,
        DataType::Timestamp(TimeUnit::Microsecond, None) => {
            downcast::<TimestampMicrosecondArray>(array)?.value(row)
        }
        other => return Err(format!("unsupported integer-like join key type: {:?}", other)),
    };
    Ok(Some(v))
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef) -> Result<&'a T, String> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| "join key array downcast failed".to_string())
}

fn is_int_like(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Boolean
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::Date32
            | DataType::Timestamp(TimeUnit::Microsecond, None)
    )
}

impl KeyHasher {
    pub(crate) fn new(channel: usize, data_type: DataType) -> Result<Self, String> {
        let value_ids = if is_int_like(&data_type) {
            Some(ValueIdMap::Int(HashMap::new()))
        } else if data_type == DataType::Utf8 {
            Some(ValueIdMap::Utf8(HashMap::new()))
        } else if matches!(data_type, DataType::Float32 | DataType::Float64) {
            None
        } else {
            return Err(format!("unsupported join key type: {:?}", data_type));
        };
        Ok(Self {
            channel,
            data_type,
            value_ids,
        })
    }

    pub(crate) fn channel(&self) -> usize {
        self.channel
    }

    /// Record the distinct values of one build-side key array, assigning dense
    /// ids in observation order. Past the distinct cap the hasher degrades to
    /// hash-only addressing.
    pub(crate) fn observe_build_column(&mut self, array: &ArrayRef) -> Result<(), String> {
        if array.data_type() != &self.data_type {
            return Err(format!(
                "join key type mismatch at channel {}: expected {:?}, got {:?}",
                self.channel,
                self.data_type,
                array.data_type()
            ));
        }
        let mut overflowed = false;
        if let Some(map) = self.value_ids.as_mut() {
            for row in 0..array.len() {
                if array.is_null(row) {
                    continue;
                }
                match map {
                    ValueIdMap::Int(m) => {
                        let v =
                            int_value_at(array, row)?.ok_or_else(|| "null key".to_string())?;
                        let next = m.len() as u64;
                        m.entry(v).or_insert(next);
                    }
                    ValueIdMap::Utf8(m) => {
                        let arr = downcast::<StringArray>(array)?;
                        if !m.contains_key(arr.value(row)) {
                            let next = m.len() as u64;
                            m.insert(arr.value(row).to_string(), next);
                        }
                    }
                }
                if map.len() > MAX_VALUE_ID_DISTINCT {
                    overflowed = true;
                    break;
                }
            }
        }
        if overflowed {
            self.value_ids = None;
        }
        Ok(())
    }

    /// Number of distinct values observed, or None once degraded to hash mode.
    pub(crate) fn value_id_cardinality(&self) -> Option<u64> {
        self.value_ids.as_ref().map(|m| m.len() as u64)
    }

    /// Translate key values to value ids, mixing them into `hashes`.
    ///
    /// Rows whose value was never observed on the build side are removed from
    /// `active_rows`. With `mix` the existing entry is scaled by this key's
    /// cardinality before adding the id, producing the composite id the table
    /// buckets on.
    pub(crate) fn lookup_value_ids(
        &self,
        array: &ArrayRef,
        active_rows: &mut [bool],
        hashes: &mut [u64],
        mix: bool,
    ) -> Result<(), String> {
        let map = self
            .value_ids
            .as_ref()
            .ok_or_else(|| "value id lookup on hash-mode key hasher".to_string())?;
        let cardinality = map.len() as u64;
        for row in 0..array.len() {
            if !active_rows[row] {
                continue;
            }
            let id = match map {
                ValueIdMap::Int(m) => match int_value_at(array, row)? {
                    Some(v) => m.get(&v).copied(),
                    None => None,
                },
                ValueIdMap::Utf8(m) => {
                    if array.is_null(row) {
                        None
                    } else {
                        let arr = downcast::<StringArray>(array)?;
                        m.get(arr.value(row)).copied()
                    }
                }
            };
            match id {
                Some(id) => {
                    hashes[row] = if mix {
                        hashes[row] * cardinality + id
                    } else {
                        id
                    };
                }
                None => active_rows[row] = false,
            }
        }
        Ok(())
    }

    /// Hash key values for active rows, mixing into existing hashes when `mix`.
    pub(crate) fn hash_column(
        &self,
        array: &ArrayRef,
        active_rows: &[bool],
        hashes: &mut [u64],
        mix: bool,
        seed: u64,
    ) -> Result<(), String> {
        for row in 0..array.len() {
            if !active_rows[row] {
                continue;
            }
            let value_hash = match array.data_type() {
                DataType::Utf8 => {
                    let arr = downcast::<StringArray>(array)?;
                    hash_bytes_with_seed(seed, arr.value(row).as_bytes())
                }
                DataType::Float32 => {
                    let arr = downcast::<Float32Array>(array)?;
                    hash_u64_with_seed(seed, canonical_f64_bits(arr.value(row) as f64))
                }
                DataType::Float64 => {
                    let arr = downcast::<Float64Array>(array)?;
                    hash_u64_with_seed(seed, canonical_f64_bits(arr.value(row)))
                }
                _ => {
                    let v = int_value_at(array, row)?
                        .ok_or_else(|| "hash of null join key row".to_string())?;
                    hash_u64_with_seed(seed, v as u64)
                }
            };
            hashes[row] = if mix {
                combine_hash(hashes[row], value_hash)
            } else {
                value_hash
            };
        }
        Ok(())
    }

    /// Derive an exact IN filter from the observed build value set.
    ///
    /// Returns None once the hasher degraded to hash mode. `nulls_allowed`
    /// would admit null probe values; join keys use `=` semantics so callers
    /// pass false.
    pub(crate) fn get_filter(
        &self,
        slot_id: SlotId,
        nulls_allowed: bool,
    ) -> Option<RuntimeInFilter> {
        let map = self.value_ids.as_ref()?;
        let values = match map {
            ValueIdMap::Int(m) => match &self.data_type {
                DataType::Int32 => RuntimeInFilterValues::Int32(
                    m.keys().map(|v| *v as i32).collect::<HashSet<i32>>(),
                ),
                DataType::Date32 => RuntimeInFilterValues::Date32(
                    m.keys().map(|v| *v as i32).collect::<HashSet<i32>>(),
                ),
                DataType::Int64 => {
                    RuntimeInFilterValues::Int64(m.keys().copied().collect::<HashSet<i64>>())
                }
                // Remaining integer-like key types have no matching filter
                // column representation.
                _ => return None,
            },
            ValueIdMap::Utf8(m) => {
                RuntimeInFilterValues::Utf8(m.keys().cloned().collect::<HashSet<String>>())
            }
        };
        Some(RuntimeInFilter::new(slot_id, values, nulls_allowed))
    }
}
