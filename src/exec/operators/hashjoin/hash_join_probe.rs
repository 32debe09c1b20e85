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
//! Hash-join probe operator.
//!
//! Responsibilities:
//! - Streams probe-side chunks against the shared build table: key decoding,
//!   batch lookup, cursor-driven result enumeration across many output chunks,
//!   residual-filter evaluation, and null-padded miss emission.
//! - Implements the null-aware anti-join re-test against null-keyed (or all)
//!   build rows, unmatched-build emission at end of input for right/full
//!   variants, and runtime-filter derivation with full join elision.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, RecordBatch, new_null_array};
use arrow::datatypes::SchemaRef;

use super::join_bridge::{HashJoinBridge, ProbePeerGroup};
use super::join_hash_table::{HashLookup, JoinHashTable, JoinResultIterator};
use super::join_probe_utils::{
    LeftSemiJoinTracker, NoMatchDetector, constant_at, take_indices,
};
use super::key_hasher::HashMode;
use super::row_container::{BuildRowId, ROW_NONE, RowContainerIterator};
use crate::common::ids::SlotId;
use crate::exec::chunk::{Chunk, field_slot_id};
use crate::exec::expr::{ExprArena, ExprId};
use crate::exec::node::join::{HashJoinNode, JoinType};
use crate::exec::pipeline::dependency::DependencyHandle;
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::exec::runtime_filter::RuntimeFilterTarget;
use crate::petrel_logging::debug;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::profile::{CounterUnit, OperatorProfiles};
use crate::runtime::runtime_state::RuntimeState;

/// Build rows scanned per filter-evaluation chunk in the null-aware anti path.
const BUILD_SCAN_BATCH_SIZE: usize = 1024;

/// Counter emitted when the join has been elided by pushed-down runtime filters.
const REPLACED_WITH_RUNTIME_FILTER_ROWS: &str = "ReplacedWithRuntimeFilterRows";

#[derive(Copy, Clone, Debug)]
struct IdentityProjection {
    input_channel: usize,
    output_channel: usize,
}

/// Compiled residual filter: expression, null-propagation, and the partition of
/// its referenced fields into probe- and build-sourced projections.
#[derive(Debug)]
struct JoinFilter {
    expr: ExprId,
    propagates_nulls: bool,
    probe_inputs: Vec<IdentityProjection>,
    build_inputs: Vec<IdentityProjection>,
    input_schema: SchemaRef,
}

/// Immutable per-join configuration shared by all probe driver instances.
struct ProbeConfig {
    join_type: JoinType,
    key_channels: Vec<usize>,
    probe_key_slots: Vec<SlotId>,
    identity_projections: Vec<IdentityProjection>,
    table_projections: Vec<IdentityProjection>,
    output_schema: SchemaRef,
    filter: Option<JoinFilter>,
}

/// Factory for hash-join probe operators reading one shared build table.
pub struct HashJoinProbeFactory {
    name: String,
    config: Arc<ProbeConfig>,
    arena: Arc<ExprArena>,
    bridge: Arc<HashJoinBridge>,
    peers: Arc<ProbePeerGroup>,
    pushdown: Option<Arc<dyn RuntimeFilterTarget>>,
}

impl std::fmt::Debug for HashJoinProbeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashJoinProbeFactory")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn slot_to_channel(schema: &SchemaRef) -> Result<Vec<(SlotId, usize)>, String> {
    let mut out = Vec::with_capacity(schema.fields().len());
    for (idx, field) in schema.fields().iter().enumerate() {
        let slot = field_slot_id(field.as_ref())?
            .ok_or_else(|| format!("schema field '{}' misses a slot id", field.name()))?;
        out.push((slot, idx));
    }
    Ok(out)
}

fn find_channel(map: &[(SlotId, usize)], slot: SlotId) -> Option<usize> {
    map.iter().find(|(s, _)| *s == slot).map(|(_, idx)| *idx)
}

impl HashJoinProbeFactory {
    pub fn new(
        node: Arc<HashJoinNode>,
        arena: Arc<ExprArena>,
        bridge: Arc<HashJoinBridge>,
        peers: Arc<ProbePeerGroup>,
        pushdown: Option<Arc<dyn RuntimeFilterTarget>>,
    ) -> Result<Self, String> {
        let probe_map = slot_to_channel(&node.probe_schema)?;
        let build_map = slot_to_channel(&node.build_schema)?;

        if node.probe_key_channels.len() != node.build_key_channels.len() {
            return Err(format!(
                "join key count mismatch: probe={} build={}",
                node.probe_key_channels.len(),
                node.build_key_channels.len()
            ));
        }
        let mut probe_key_slots = Vec::with_capacity(node.probe_key_channels.len());
        for &channel in &node.probe_key_channels {
            let field = node
                .probe_schema
                .fields()
                .get(channel)
                .ok_or_else(|| format!("probe key channel {} out of bounds", channel))?;
            let slot = field_slot_id(field.as_ref())?
                .ok_or_else(|| format!("probe key field '{}' misses a slot id", field.name()))?;
            probe_key_slots.push(slot);
        }

        let mut identity_projections = Vec::new();
        let mut table_projections = Vec::new();
        for (out_channel, field) in node.output_schema.fields().iter().enumerate() {
            let slot = field_slot_id(field.as_ref())?
                .ok_or_else(|| format!("output field '{}' misses a slot id", field.name()))?;
            if let Some(probe_channel) = find_channel(&probe_map, slot) {
                identity_projections.push(IdentityProjection {
                    input_channel: probe_channel,
                    output_channel: out_channel,
                });
            } else if let Some(build_channel) = find_channel(&build_map, slot) {
                table_projections.push(IdentityProjection {
                    input_channel: build_channel,
                    output_channel: out_channel,
                });
            } else {
                return Err(format!(
                    "join output slot {} not found in probe or build input",
                    slot
                ));
            }
        }

        let filter = match node.residual_filter {
            Some(expr) => Some(Self::compile_filter(
                expr, &arena, &node, &probe_map, &build_map,
            )?),
            None => None,
        };

        Ok(Self {
            name: format!("HASH_JOIN_PROBE (id={})", node.node_id),
            config: Arc::new(ProbeConfig {
                join_type: node.join_type,
                key_channels: node.probe_key_channels.clone(),
                probe_key_slots,
                identity_projections,
                table_projections,
                output_schema: Arc::clone(&node.output_schema),
                filter,
            }),
            arena,
            bridge,
            peers,
            pushdown,
        })
    }

    /// Partition the filter's referenced fields into probe- and build-sourced
    /// projections and derive the synthetic filter-input schema.
    fn compile_filter(
        expr: ExprId,
        arena: &ExprArena,
        node: &HashJoinNode,
        probe_map: &[(SlotId, usize)],
        build_map: &[(SlotId, usize)],
    ) -> Result<JoinFilter, String> {
        let mut probe_inputs = Vec::new();
        let mut build_inputs = Vec::new();
        let mut fields = Vec::new();
        let mut filter_channel = 0usize;
        for slot in arena.distinct_slots(expr)? {
            if let Some(channel) = find_channel(probe_map, slot) {
                probe_inputs.push(IdentityProjection {
                    input_channel: channel,
                    output_channel: filter_channel,
                });
                fields.push(node.probe_schema.field(channel).clone());
            } else if let Some(channel) = find_channel(build_map, slot) {
                build_inputs.push(IdentityProjection {
                    input_channel: channel,
                    output_channel: filter_channel,
                });
                fields.push(node.build_schema.field(channel).clone());
            } else {
                return Err(format!(
                    "join filter slot {} not found in probe or build input",
                    slot
                ));
            }
            filter_channel += 1;
        }
        Ok(JoinFilter {
            expr,
            propagates_nulls: arena.propagates_nulls(expr)?,
            probe_inputs,
            build_inputs,
            input_schema: Arc::new(arrow::datatypes::Schema::new(fields)),
        })
    }
}

impl OperatorFactory for HashJoinProbeFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: i32, driver_id: i32) -> Box<dyn Operator> {
        Box::new(HashJoinProbeOperator {
            name: self.name.clone(),
            driver_id,
            config: Arc::clone(&self.config),
            arena: Arc::clone(&self.arena),
            bridge: Arc::clone(&self.bridge),
            peers: Arc::clone(&self.peers),
            pushdown: self.pushdown.as_ref().map(Arc::clone),
            dep: self.bridge.dep(),
            table: None,
            input: None,
            lookup: HashLookup::default(),
            results: JoinResultIterator::default(),
            non_null_rows: Vec::new(),
            active_rows: Vec::new(),
            row_mapping: Vec::new(),
            output_rows: Vec::new(),
            scratch_mapping: Vec::new(),
            scratch_rows: Vec::new(),
            null_probe_filter_rows: Vec::new(),
            build_rows_scratch: Vec::new(),
            no_match_detector: NoMatchDetector::default(),
            left_semi_tracker: LeftSemiJoinTracker::default(),
            build_iter: RowContainerIterator::default(),
            finishing: false,
            finished: false,
            last_probe: false,
            runtime_filters_pushed: false,
            can_replace_with_runtime_filter: false,
            replaced_with_runtime_filter: false,
            input_rows: 0,
            output_rows_total: 0,
            profile_initialized: false,
            profiles: None,
            mem_tracker: None,
        })
    }
}

struct HashJoinProbeOperator {
    name: String,
    driver_id: i32,
    config: Arc<ProbeConfig>,
    arena: Arc<ExprArena>,
    bridge: Arc<HashJoinBridge>,
    peers: Arc<ProbePeerGroup>,
    pushdown: Option<Arc<dyn RuntimeFilterTarget>>,
    dep: DependencyHandle,
    table: Option<Arc<JoinHashTable>>,
    input: Option<Chunk>,
    lookup: HashLookup,
    results: JoinResultIterator,
    /// Probe rows with all keys non-null; fixed after decoding one input.
    non_null_rows: Vec<bool>,
    /// Starts as `non_null_rows`; value-id lookups remove unmapped rows.
    active_rows: Vec<bool>,
    /// Probe-input row index per output row.
    row_mapping: Vec<u32>,
    /// Build row per output row, ROW_NONE for null-padded misses.
    output_rows: Vec<BuildRowId>,
    scratch_mapping: Vec<u32>,
    scratch_rows: Vec<BuildRowId>,
    /// Per output row: some probe-sourced filter input is null.
    null_probe_filter_rows: Vec<bool>,
    build_rows_scratch: Vec<BuildRowId>,
    no_match_detector: NoMatchDetector,
    left_semi_tracker: LeftSemiJoinTracker,
    build_iter: RowContainerIterator,
    finishing: bool,
    finished: bool,
    /// This driver won the peer barrier and emits unmatched build rows.
    last_probe: bool,
    runtime_filters_pushed: bool,
    can_replace_with_runtime_filter: bool,
    replaced_with_runtime_filter: bool,
    input_rows: usize,
    output_rows_total: usize,
    profile_initialized: bool,
    profiles: Option<OperatorProfiles>,
    mem_tracker: Option<Arc<MemTracker>>,
}

impl Operator for HashJoinProbeOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.mem_tracker = Some(tracker);
    }

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        self.profiles = Some(profiles);
    }

    fn prepare(&mut self) -> Result<(), String> {
        self.try_load_build()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn cancel(&mut self) {
        self.input = None;
        self.table = None;
        self.finished = true;
    }

    fn clear_runtime_filters(&mut self) {
        // The join degenerates to the pushed filter when the table maps one
        // unique key per row and projects no build columns.
        let Some(table) = self.table.as_ref() else {
            return;
        };
        if self.config.key_channels.len() == 1
            && !table.has_duplicate_keys()
            && self.config.table_projections.is_empty()
            && self.config.filter.is_none()
            && self.runtime_filters_pushed
        {
            self.can_replace_with_runtime_filter = true;
        }
    }

    fn as_processor_mut(&mut self) -> Option<&mut dyn ProcessorOperator> {
        Some(self)
    }

    fn as_processor_ref(&self) -> Option<&dyn ProcessorOperator> {
        Some(self)
    }
}

impl ProcessorOperator for HashJoinProbeOperator {
    fn need_input(&self) -> bool {
        if self.finishing || self.finished || self.input.is_some() {
            return false;
        }
        self.table.is_some() || self.bridge.has_build()
    }

    fn has_output(&self) -> bool {
        if self.finished {
            return false;
        }
        self.input.is_some() || self.finishing
    }

    fn push_chunk(&mut self, _state: &RuntimeState, mut chunk: Chunk) -> Result<(), String> {
        if self.finished {
            return Ok(());
        }
        if self.finishing {
            return Err("join probe received input after set_finishing".to_string());
        }
        self.try_load_build()?;
        if self.finished {
            return Ok(());
        }
        let table = self
            .table
            .clone()
            .ok_or_else(|| "join probe received input before build completion".to_string())?;
        self.init_profile_if_needed();
        if chunk.is_empty() {
            return Ok(());
        }
        if let Some(tracker) = self.mem_tracker.as_ref() {
            chunk.transfer_to(tracker);
        }
        self.input_rows += chunk.len();
        self.input = Some(chunk);
        if self.can_replace_with_runtime_filter {
            self.replaced_with_runtime_filter = true;
            return Ok(());
        }
        self.decode_and_probe(&table)
    }

    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Option<Chunk>, String> {
        self.try_load_build()?;
        if self.finished {
            return Ok(None);
        }

        let Some(input) = self.input.clone() else {
            if !self.finishing {
                return Ok(None);
            }
            if self.config.join_type.needs_probed_flags() && self.last_probe {
                let Some(table) = self.table.clone() else {
                    // Build not published yet; stay blocked on the dependency.
                    return Ok(None);
                };
                let out = self.build_side_output(&table, state.chunk_size())?;
                if out.is_none() {
                    self.set_finished();
                }
                return Ok(out);
            }
            self.set_finished();
            return Ok(None);
        };
        let input_size = input.len();

        if self.replaced_with_runtime_filter {
            if let Some(profiles) = self.profiles.as_ref() {
                profiles.common.counter_add(
                    REPLACED_WITH_RUNTIME_FILTER_ROWS,
                    CounterUnit::Rows,
                    input_size as i64,
                );
            }
            let out = self.passthrough_output(&input)?;
            self.input = None;
            self.output_rows_total += out.len();
            return Ok(Some(out));
        }

        let table = self
            .table
            .clone()
            .ok_or_else(|| "join probe has input but no build table".to_string())?;
        let join_type = self.config.join_type;
        let empty_build = table.num_distinct() == 0;
        let semi_or_anti_no_filter = self.config.filter.is_none()
            && matches!(join_type, JoinType::LeftSemi | JoinType::NullAwareAnti);
        // Left semi and anti joins are cardinality reducing: one output batch
        // covers the whole input. Same for the empty-build passthrough shapes.
        let one_batch_per_input = semi_or_anti_no_filter || empty_build;
        let out_size = if one_batch_per_input {
            input_size
        } else {
            state.chunk_size()
        };

        loop {
            let num_out = if empty_build {
                // Anti, left and full joins emit every probe row with nulls for
                // build columns; key nulls are not filtered here.
                self.row_mapping.clear();
                self.output_rows.clear();
                for i in 0..input_size {
                    self.row_mapping.push(i as u32);
                    self.output_rows.push(ROW_NONE);
                }
                input_size
            } else if join_type == JoinType::NullAwareAnti && self.config.filter.is_none() {
                // Probe rows with no key nulls and no build match survive.
                self.row_mapping.clear();
                self.output_rows.clear();
                for i in 0..input_size {
                    if self.non_null_rows[i]
                        && (!self.active_rows[i] || self.lookup.hits[i] == ROW_NONE)
                    {
                        self.row_mapping.push(i as u32);
                        self.output_rows.push(ROW_NONE);
                    }
                }
                self.row_mapping.len()
            } else {
                table.list_join_results(
                    &mut self.results,
                    &self.lookup,
                    join_type.lists_misses(),
                    out_size,
                    &mut self.row_mapping,
                    &mut self.output_rows,
                )?
            };

            if num_out == 0 {
                self.input = None;
                return Ok(None);
            }

            let num_out = self.eval_filter(&input, &table, num_out)?;
            if num_out == 0 {
                // The filter was false on all rows of this result batch.
                if one_batch_per_input {
                    self.input = None;
                    return Ok(None);
                }
                continue;
            }

            if join_type.needs_probed_flags() {
                table.rows().set_probed_flags(&self.output_rows[..num_out]);
            }

            // Right semi only emits build rows once the probe side completed.
            if join_type == JoinType::RightSemi {
                if self.results.at_end() {
                    self.input = None;
                }
                return Ok(None);
            }

            let out = self.fill_output(&input, &table, num_out)?;
            if one_batch_per_input {
                self.input = None;
            }
            self.output_rows_total += out.len();
            return Ok(Some(out));
        }
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        if self.finished || self.finishing {
            return Ok(());
        }
        self.finishing = true;
        if self.config.join_type.needs_probed_flags() {
            // The last driver over the barrier emits the unmatched build rows.
            if self.peers.all_peers_finished()? {
                self.last_probe = true;
            }
        }
        Ok(())
    }

    fn precondition_dependency(&self) -> Option<DependencyHandle> {
        if self.table.is_some() || self.finished || self.bridge.has_build() {
            None
        } else {
            Some(self.dep.clone())
        }
    }
}

impl HashJoinProbeOperator {
    fn init_profile_if_needed(&mut self) {
        if self.profile_initialized {
            return;
        }
        self.profile_initialized = true;
        if let Some(profiles) = self.profiles.as_ref() {
            profiles
                .common
                .add_info_string("JoinType", self.config.join_type.as_str());
        }
    }

    /// Adopt the build result once published: short-circuit variants that
    /// cannot produce output, derive runtime filters in value-id mode.
    fn try_load_build(&mut self) -> Result<(), String> {
        if self.table.is_some() || self.finished {
            return Ok(());
        }
        let Some(result) = self.bridge.build() else {
            return Ok(());
        };

        if result.anti_join_has_null_keys {
            if self.config.join_type != JoinType::NullAwareAnti {
                return Err(
                    "anti-join null-key short circuit on a non-anti join".to_string(),
                );
            }
            self.finished = true;
            return Ok(());
        }

        let table = Arc::clone(&result.table);
        if table.num_distinct() == 0
            && matches!(
                self.config.join_type,
                JoinType::Inner | JoinType::LeftSemi | JoinType::RightOuter | JoinType::RightSemi
            )
        {
            self.table = Some(table);
            self.finished = true;
            return Ok(());
        }

        if matches!(
            self.config.join_type,
            JoinType::Inner | JoinType::LeftSemi | JoinType::RightSemi
        ) && table.hash_mode() == HashMode::ValueId
        {
            if let Some(target) = self.pushdown.as_ref() {
                let accepted = target.can_pushdown_filters(&self.config.probe_key_slots);
                for (i, slot) in self.config.probe_key_slots.iter().enumerate() {
                    if !accepted.contains(slot) {
                        continue;
                    }
                    if let Some(filter) = table.hashers()[i].get_filter(*slot, false) {
                        target.add_runtime_filter(*slot, filter);
                        self.runtime_filters_pushed = true;
                    }
                }
            }
        }

        self.table = Some(table);
        Ok(())
    }

    /// Decode probe keys, compute row sets, and run the batch lookup.
    fn decode_and_probe(&mut self, table: &JoinHashTable) -> Result<(), String> {
        let input = self
            .input
            .clone()
            .ok_or_else(|| "decode without probe input".to_string())?;
        let num_rows = input.len();
        let join_type = self.config.join_type;

        self.non_null_rows.clear();
        self.non_null_rows.resize(num_rows, true);
        for &channel in &self.config.key_channels {
            let column = input
                .columns()
                .get(channel)
                .ok_or_else(|| format!("probe key channel {} out of bounds", channel))?;
            if let Some(nulls) = column.logical_nulls() {
                for row in 0..num_rows {
                    if nulls.is_null(row) {
                        self.non_null_rows[row] = false;
                    }
                }
            }
        }

        if table.num_distinct() == 0 {
            // Valid only for variants that emit probe rows without matches.
            if !matches!(
                join_type,
                JoinType::NullAwareAnti | JoinType::LeftOuter | JoinType::FullOuter
            ) {
                return Err(format!(
                    "empty build side reached probe of {} join",
                    join_type.as_str()
                ));
            }
            self.results.reset();
            self.results.mark_at_end();
            return Ok(());
        }

        self.active_rows.clear();
        self.active_rows.extend_from_slice(&self.non_null_rows);
        self.lookup.hashes.clear();
        self.lookup.hashes.resize(num_rows, 0);

        let mut key_arrays = Vec::with_capacity(self.config.key_channels.len());
        for &channel in &self.config.key_channels {
            let column = input
                .columns()
                .get(channel)
                .cloned()
                .ok_or_else(|| format!("probe key channel {} out of bounds", channel))?;
            key_arrays.push(column);
        }
        match table.hash_mode() {
            HashMode::ValueId => {
                for (i, hasher) in table.hashers().iter().enumerate() {
                    hasher.lookup_value_ids(
                        &key_arrays[i],
                        &mut self.active_rows,
                        &mut self.lookup.hashes,
                        i > 0,
                    )?;
                }
                self.lookup.key_rows = None;
            }
            HashMode::Hash => {
                for (i, hasher) in table.hashers().iter().enumerate() {
                    hasher.hash_column(
                        &key_arrays[i],
                        &self.active_rows,
                        &mut self.lookup.hashes,
                        i > 0,
                        table.hash_seed(),
                    )?;
                }
                self.lookup.key_rows = Some(table.convert_probe_keys(&key_arrays)?);
            }
        }

        self.lookup.rows.clear();
        if self.active_rows.iter().all(|v| *v) {
            self.lookup.rows.extend(0..num_rows as u32);
        } else {
            for row in 0..num_rows {
                if self.active_rows[row] {
                    self.lookup.rows.push(row as u32);
                }
            }
        }

        if join_type.lists_misses() {
            // Every input row needs a hits entry so misses can reach the
            // output; the probe only touches active rows.
            self.lookup.hits.clear();
            self.lookup.hits.resize(num_rows, ROW_NONE);
            if !self.lookup.rows.is_empty() {
                table.probe(&mut self.lookup)?;
            }
            self.lookup.rows.clear();
            self.lookup.rows.extend(0..num_rows as u32);
        } else {
            if self.lookup.rows.is_empty() {
                self.input = None;
                return Ok(());
            }
            let last = *self
                .lookup
                .rows
                .last()
                .ok_or_else(|| "probe row list unexpectedly empty".to_string())?;
            self.lookup.hits.clear();
            self.lookup.hits.resize(last as usize + 1, ROW_NONE);
            table.probe(&mut self.lookup)?;
        }
        self.results.reset();
        Ok(())
    }

    /// Apply the residual filter to `num_rows` candidate pairs; returns the
    /// surviving count after variant-specific reinterpretation.
    fn eval_filter(
        &mut self,
        input: &Chunk,
        table: &JoinHashTable,
        num_rows: usize,
    ) -> Result<usize, String> {
        if self.config.filter.is_none() {
            return Ok(num_rows);
        }
        // Hold the shared config through a local clone so `self` stays free.
        let config = Arc::clone(&self.config);
        let filter = config
            .filter
            .as_ref()
            .ok_or_else(|| "join filter vanished".to_string())?;

        let filter_chunk = self.fill_filter_input(input, table, num_rows, filter)?;
        if self.config.join_type == JoinType::NullAwareAnti {
            self.prepare_null_probe_rows(&filter_chunk, num_rows, filter)?;
        }
        let result = self.arena.eval(filter.expr, &filter_chunk)?;
        let result = result
            .as_any()
            .downcast_ref::<BooleanArray>()
            .cloned()
            .ok_or_else(|| "join residual filter must return a boolean column".to_string())?;

        // Compact in place: the raw pairs move to scratch, survivors (and
        // synthesized misses) rebuild the mapping buffers.
        std::mem::swap(&mut self.row_mapping, &mut self.scratch_mapping);
        std::mem::swap(&mut self.output_rows, &mut self.scratch_rows);
        self.row_mapping.clear();
        self.output_rows.clear();

        match self.config.join_type {
            JoinType::LeftOuter | JoinType::FullOuter => {
                for i in 0..num_rows {
                    let row = self.scratch_mapping[i];
                    let build = self.scratch_rows[i];
                    let passed = result.is_valid(i) && result.value(i);
                    if let Some(miss) = self.no_match_detector.advance(row, passed) {
                        self.row_mapping.push(miss);
                        self.output_rows.push(ROW_NONE);
                    }
                    if passed {
                        self.row_mapping.push(row);
                        self.output_rows.push(build);
                    }
                }
                if self.results.at_end() {
                    if let Some(miss) = self.no_match_detector.finish() {
                        self.row_mapping.push(miss);
                        self.output_rows.push(ROW_NONE);
                    }
                }
            }
            JoinType::LeftSemi => {
                // A null filter result does not emit the probe row.
                for i in 0..num_rows {
                    if result.is_valid(i) && result.value(i) {
                        if let Some(row) = self.left_semi_tracker.advance(self.scratch_mapping[i])
                        {
                            self.row_mapping.push(row);
                            self.output_rows.push(ROW_NONE);
                        }
                    }
                }
                if self.results.at_end() {
                    if let Some(row) = self.left_semi_tracker.finish() {
                        self.row_mapping.push(row);
                        self.output_rows.push(ROW_NONE);
                    }
                }
            }
            JoinType::NullAwareAnti => {
                self.eval_filter_in_null_aware_anti(input, table, filter, num_rows, &result)?;
            }
            _ => {
                for i in 0..num_rows {
                    if result.is_valid(i) && result.value(i) {
                        self.row_mapping.push(self.scratch_mapping[i]);
                        self.output_rows.push(self.scratch_rows[i]);
                    }
                }
            }
        }
        Ok(self.row_mapping.len())
    }

    /// Assemble the synthetic filter-input chunk for `num_rows` candidate pairs.
    fn fill_filter_input(
        &self,
        input: &Chunk,
        table: &JoinHashTable,
        num_rows: usize,
        filter: &JoinFilter,
    ) -> Result<Chunk, String> {
        let num_fields = filter.input_schema.fields().len();
        let mut columns: Vec<Option<ArrayRef>> = vec![None; num_fields];
        for p in &filter.probe_inputs {
            let column = input
                .columns()
                .get(p.input_channel)
                .ok_or_else(|| "filter probe channel out of bounds".to_string())?;
            columns[p.output_channel] =
                Some(take_indices(column, &self.row_mapping[..num_rows])?);
        }
        for p in &filter.build_inputs {
            columns[p.output_channel] = Some(
                table
                    .rows()
                    .extract_column(&self.output_rows[..num_rows], p.input_channel)?,
            );
        }
        let columns = columns
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| "join filter input channel not populated".to_string())?;
        let batch = RecordBatch::try_new(Arc::clone(&filter.input_schema), columns)
            .map_err(|e| e.to_string())?;
        Chunk::try_new(batch)
    }

    /// Mark output rows whose probe-sourced filter inputs contain a null.
    fn prepare_null_probe_rows(
        &mut self,
        filter_chunk: &Chunk,
        num_rows: usize,
        filter: &JoinFilter,
    ) -> Result<(), String> {
        self.null_probe_filter_rows.clear();
        self.null_probe_filter_rows.resize(num_rows, false);
        if !filter.propagates_nulls {
            return Ok(());
        }
        for p in &filter.probe_inputs {
            let column = filter_chunk
                .columns()
                .get(p.output_channel)
                .ok_or_else(|| "filter input channel out of bounds".to_string())?;
            if let Some(nulls) = column.logical_nulls() {
                for i in 0..num_rows {
                    if nulls.is_null(i) {
                        self.null_probe_filter_rows[i] = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// Null-aware anti join with a filter: a probe row survives only when no
    /// build row satisfies the join condition with a true filter, re-testing
    /// null-keyed (or, for null-keyed probes, all) build rows the lookup never
    /// considered.
    fn eval_filter_in_null_aware_anti(
        &mut self,
        input: &Chunk,
        table: &JoinHashTable,
        filter: &JoinFilter,
        num_rows: usize,
        result: &BooleanArray,
    ) -> Result<(), String> {
        let input_size = input.len();
        let mut skip_rows = vec![false; num_rows];
        let mut test_null_key_rows = vec![false; input_size];
        let mut test_all_rows = vec![false; input_size];

        for i in 0..num_rows {
            let j = self.scratch_mapping[i] as usize;
            if filter.propagates_nulls && self.null_probe_filter_rows[i] {
                // A null filter result is indistinguishable from a possible
                // true; the probe row can never be emitted.
                skip_rows[i] = true;
            } else if self.non_null_rows[j] {
                if result.is_valid(i) && result.value(i) {
                    skip_rows[i] = true;
                } else {
                    test_null_key_rows[j] = true;
                }
            } else {
                test_all_rows[j] = true;
            }
        }
        for i in 0..num_rows {
            if skip_rows[i] {
                let j = self.scratch_mapping[i] as usize;
                test_null_key_rows[j] = false;
                test_all_rows[j] = false;
            }
        }

        self.test_filter_on_build_side(input, table, filter, &mut test_null_key_rows, true)?;
        self.test_filter_on_build_side(input, table, filter, &mut test_all_rows, false)?;

        for i in 0..num_rows {
            let j = self.scratch_mapping[i] as usize;
            let passed = if filter.propagates_nulls && self.null_probe_filter_rows[i] {
                true
            } else if self.non_null_rows[j] {
                if result.is_valid(i) && result.value(i) {
                    true
                } else {
                    !test_null_key_rows[j]
                }
            } else {
                !test_all_rows[j]
            };
            if let Some(miss) = self.no_match_detector.advance(j as u32, passed) {
                self.row_mapping.push(miss);
                self.output_rows.push(ROW_NONE);
            }
        }
        if self.results.at_end() {
            if let Some(miss) = self.no_match_detector.finish() {
                self.row_mapping.push(miss);
                self.output_rows.push(ROW_NONE);
            }
        }
        Ok(())
    }

    /// Evaluate the filter for each candidate probe row against a subset of the
    /// build container (null-keyed rows only, or all rows), in chunks. Rows for
    /// which any build row passes are removed from `rows`.
    fn test_filter_on_build_side(
        &self,
        input: &Chunk,
        table: &JoinHashTable,
        filter: &JoinFilter,
        rows: &mut [bool],
        null_key_rows_only: bool,
    ) -> Result<(), String> {
        if !rows.iter().any(|v| *v) {
            return Ok(());
        }
        let container = table.rows();
        let mut iter = RowContainerIterator::default();
        let mut chunk_rows: Vec<BuildRowId> = Vec::with_capacity(BUILD_SCAN_BATCH_SIZE);
        loop {
            let n = container.list_rows(&mut iter, BUILD_SCAN_BATCH_SIZE, &mut chunk_rows);
            if n == 0 {
                return Ok(());
            }

            let mut selected = vec![true; n];
            if null_key_rows_only {
                // Keep only rows with a null in some key: the lookup skipped
                // them during matching.
                let mut any_null = vec![false; n];
                for &channel in container.key_channels() {
                    let column = container.extract_column(&chunk_rows, channel)?;
                    if let Some(nulls) = column.logical_nulls() {
                        for p in 0..n {
                            if nulls.is_null(p) {
                                any_null[p] = true;
                            }
                        }
                    }
                }
                selected = any_null;
                if !selected.iter().any(|v| *v) {
                    continue;
                }
            }

            let mut build_columns = Vec::with_capacity(filter.build_inputs.len());
            for p in &filter.build_inputs {
                build_columns.push((
                    p.output_channel,
                    container.extract_column(&chunk_rows, p.input_channel)?,
                ));
            }

            for j in 0..rows.len() {
                if !rows[j] {
                    continue;
                }
                let num_fields = filter.input_schema.fields().len();
                let mut columns: Vec<Option<ArrayRef>> = vec![None; num_fields];
                for p in &filter.probe_inputs {
                    let column = input
                        .columns()
                        .get(p.input_channel)
                        .ok_or_else(|| "filter probe channel out of bounds".to_string())?;
                    columns[p.output_channel] = Some(constant_at(column, j, n)?);
                }
                for (channel, array) in &build_columns {
                    columns[*channel] = Some(Arc::clone(array));
                }
                let columns = columns
                    .into_iter()
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| "join filter input channel not populated".to_string())?;
                let batch = RecordBatch::try_new(Arc::clone(&filter.input_schema), columns)
                    .map_err(|e| e.to_string())?;
                let chunk = Chunk::try_new(batch)?;
                let result = self.arena.eval(filter.expr, &chunk)?;
                let result = result
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .ok_or_else(|| {
                        "join residual filter must return a boolean column".to_string()
                    })?;
                let any_true = (0..n)
                    .any(|p| selected[p] && result.is_valid(p) && result.value(p));
                if any_true {
                    rows[j] = false;
                }
            }
        }
    }

    /// Construct one output chunk for `num_out` (probe row, build row) pairs.
    fn fill_output(
        &mut self,
        input: &Chunk,
        table: &JoinHashTable,
        num_out: usize,
    ) -> Result<Chunk, String> {
        let num_fields = self.config.output_schema.fields().len();
        let mut columns: Vec<Option<ArrayRef>> = vec![None; num_fields];
        for p in &self.config.identity_projections {
            let column = input
                .columns()
                .get(p.input_channel)
                .ok_or_else(|| "probe projection channel out of bounds".to_string())?;
            columns[p.output_channel] = Some(take_indices(column, &self.row_mapping[..num_out])?);
        }
        for p in &self.config.table_projections {
            columns[p.output_channel] = Some(
                table
                    .rows()
                    .extract_column(&self.output_rows[..num_out], p.input_channel)?,
            );
        }
        let columns = columns
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| "join output channel not populated".to_string())?;
        let batch = RecordBatch::try_new(Arc::clone(&self.config.output_schema), columns)
            .map_err(|e| e.to_string())?;
        Chunk::try_new(batch)
    }

    /// End-of-input emission of build rows for right/full variants: probed rows
    /// for right semi, not-probed rows for right/full outer, with typed null
    /// constants on the probe side.
    fn build_side_output(
        &mut self,
        table: &JoinHashTable,
        batch_size: usize,
    ) -> Result<Option<Chunk>, String> {
        let container = table.rows();
        let num_out = if self.config.join_type == JoinType::RightSemi {
            container.list_probed_rows(&mut self.build_iter, batch_size, &mut self.build_rows_scratch)
        } else {
            container.list_not_probed_rows(
                &mut self.build_iter,
                batch_size,
                &mut self.build_rows_scratch,
            )
        };
        if num_out == 0 {
            return Ok(None);
        }

        let num_fields = self.config.output_schema.fields().len();
        let mut columns: Vec<Option<ArrayRef>> = vec![None; num_fields];
        for p in &self.config.identity_projections {
            let data_type = self
                .config
                .output_schema
                .field(p.output_channel)
                .data_type()
                .clone();
            columns[p.output_channel] = Some(new_null_array(&data_type, num_out));
        }
        for p in &self.config.table_projections {
            columns[p.output_channel] =
                Some(container.extract_column(&self.build_rows_scratch, p.input_channel)?);
        }
        let columns = columns
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| "join output channel not populated".to_string())?;
        let batch = RecordBatch::try_new(Arc::clone(&self.config.output_schema), columns)
            .map_err(|e| e.to_string())?;
        let chunk = Chunk::try_new(batch)?;
        self.output_rows_total += chunk.len();
        Ok(Some(chunk))
    }

    /// Elided join: pass probe columns straight through to the output schema.
    fn passthrough_output(&self, input: &Chunk) -> Result<Chunk, String> {
        let num_fields = self.config.output_schema.fields().len();
        let mut columns: Vec<Option<ArrayRef>> = vec![None; num_fields];
        for p in &self.config.identity_projections {
            let column = input
                .columns()
                .get(p.input_channel)
                .ok_or_else(|| "probe projection channel out of bounds".to_string())?;
            columns[p.output_channel] = Some(Arc::clone(column));
        }
        let columns = columns
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| "join output channel not populated".to_string())?;
        let batch = RecordBatch::try_new(Arc::clone(&self.config.output_schema), columns)
            .map_err(|e| e.to_string())?;
        Chunk::try_new(batch)
    }

    fn set_finished(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        debug!(
            "HashJoinProbe finished: name={} driver_id={} join_type={} input_rows={} output_rows={} replaced_with_runtime_filter={}",
            self.name,
            self.driver_id,
            self.config.join_type.as_str(),
            self.input_rows,
            self.output_rows_total,
            self.replaced_with_runtime_filter
        );
    }
}
