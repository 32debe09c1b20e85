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
//! Hash-join build sink.
//!
//! Responsibilities:
//! - Consumes build-side chunks, constructs per-key hashers and the shared hash
//!   table, and selects the table addressing mode.
//! - Publishes the finished build result through the join bridge, waking probe
//!   drivers blocked on the build dependency.

use std::sync::Arc;

use crate::exec::chunk::Chunk;
use crate::exec::node::join::{HashJoinNode, JoinType};
use crate::exec::operators::hashjoin::join_bridge::{HashBuildResult, HashJoinBridge};
use crate::exec::operators::hashjoin::join_hash_table::JoinHashTable;
use crate::exec::operators::hashjoin::key_hasher::{HashMode, KeyHasher};
use crate::exec::operators::hashjoin::row_container::RowContainer;
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::petrel_logging::debug;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::runtime_state::RuntimeState;

/// Seed for hash-mode key hashing; build and probe must agree on it.
const JOIN_HASH_SEED: u64 = 0x7f4a_7c15_9e37_79b9;

/// Factory for hash-join build sinks feeding one bridge.
pub struct HashJoinBuildSinkFactory {
    name: String,
    node: Arc<HashJoinNode>,
    bridge: Arc<HashJoinBridge>,
}

impl HashJoinBuildSinkFactory {
    pub fn new(node: Arc<HashJoinNode>, bridge: Arc<HashJoinBridge>) -> Self {
        Self {
            name: format!("HASH_JOIN_BUILD (id={})", node.node_id),
            node,
            bridge,
        }
    }
}

impl OperatorFactory for HashJoinBuildSinkFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: i32, driver_id: i32) -> Box<dyn Operator> {
        Box::new(HashJoinBuildSinkOperator {
            name: self.name.clone(),
            driver_id,
            node: Arc::clone(&self.node),
            bridge: Arc::clone(&self.bridge),
            build_batches: Vec::new(),
            input_rows: 0,
            finished: false,
            mem_tracker: None,
        })
    }

    fn is_sink(&self) -> bool {
        true
    }
}

struct HashJoinBuildSinkOperator {
    name: String,
    driver_id: i32,
    node: Arc<HashJoinNode>,
    bridge: Arc<HashJoinBridge>,
    build_batches: Vec<Chunk>,
    input_rows: usize,
    finished: bool,
    mem_tracker: Option<Arc<MemTracker>>,
}

impl Operator for HashJoinBuildSinkOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.mem_tracker = Some(tracker);
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn cancel(&mut self) {
        self.build_batches.clear();
        self.finished = true;
    }

    fn as_processor_mut(&mut self) -> Option<&mut dyn ProcessorOperator> {
        Some(self)
    }

    fn as_processor_ref(&self) -> Option<&dyn ProcessorOperator> {
        Some(self)
    }
}

impl ProcessorOperator for HashJoinBuildSinkOperator {
    fn need_input(&self) -> bool {
        !self.finished
    }

    fn has_output(&self) -> bool {
        false
    }

    fn push_chunk(&mut self, _state: &RuntimeState, mut chunk: Chunk) -> Result<(), String> {
        if self.finished {
            return Err("join build sink received input after finish".to_string());
        }
        if chunk.is_empty() {
            return Ok(());
        }
        if let Some(tracker) = self.mem_tracker.as_ref() {
            chunk.transfer_to(tracker);
        }
        self.input_rows += chunk.len();
        self.build_batches.push(chunk);
        Ok(())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>, String> {
        Ok(None)
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        if self.finished {
            return Ok(());
        }
        let result = self.finalize()?;
        self.bridge.publish(result)?;
        self.finished = true;
        Ok(())
    }
}

impl HashJoinBuildSinkOperator {
    fn finalize(&mut self) -> Result<HashBuildResult, String> {
        let node = self.node.as_ref();
        if node.build_key_channels.is_empty() {
            return Err("hash join requires at least one build key".to_string());
        }

        let mut hashers = Vec::with_capacity(node.build_key_channels.len());
        for &channel in &node.build_key_channels {
            let field = node
                .build_schema
                .fields()
                .get(channel)
                .ok_or_else(|| format!("build key channel {} out of bounds", channel))?;
            hashers.push(KeyHasher::new(channel, field.data_type().clone())?);
        }
        for chunk in &self.build_batches {
            for hasher in hashers.iter_mut() {
                let column = chunk
                    .columns()
                    .get(hasher.channel())
                    .ok_or_else(|| "build chunk misses key column".to_string())?;
                hasher.observe_build_column(column)?;
            }
        }

        let mode = select_hash_mode(&hashers);
        let container = RowContainer::new(
            Arc::clone(&node.build_schema),
            node.build_key_channels.clone(),
        )?;
        // Semi/anti joins without a residual filter only test key existence;
        // one build row per key keeps their output cardinality-reducing.
        let drop_duplicates = matches!(
            node.join_type,
            JoinType::LeftSemi | JoinType::NullAwareAnti
        ) && node.residual_filter.is_none();
        let mut table = JoinHashTable::new(container, hashers, mode, JOIN_HASH_SEED, drop_duplicates)?;
        for chunk in self.build_batches.drain(..) {
            table.add_build_chunk(chunk)?;
        }

        // NOT IN with a null in the build key set is empty or unknown for every
        // probe row; without a residual filter the whole join collapses.
        let anti_join_has_null_keys = node.join_type == JoinType::NullAwareAnti
            && node.residual_filter.is_none()
            && table.has_null_build_key();

        debug!(
            "HashJoinBuild finished: node_id={} driver_id={} input_rows={} distinct={} mode={:?} null_keys={} anti_short_circuit={}",
            node.node_id,
            self.driver_id,
            self.input_rows,
            table.num_distinct(),
            table.hash_mode(),
            table.has_null_build_key(),
            anti_join_has_null_keys
        );

        Ok(HashBuildResult {
            table: Arc::new(table),
            anti_join_has_null_keys,
        })
    }
}

/// Value-id addressing needs every hasher to have a dense mapping and the
/// composite id space to fit in 64 bits.
fn select_hash_mode(hashers: &[KeyHasher]) -> HashMode {
    let mut composite: u64 = 1;
    for hasher in hashers {
        let Some(cardinality) = hasher.value_id_cardinality() else {
            return HashMode::Hash;
        };
        match composite.checked_mul(cardinality.max(1)) {
            Some(c) => composite = c,
            None => return HashMode::Hash,
        }
    }
    HashMode::ValueId
}
