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
//! End-to-end hash-join scenarios driving a build sink and probe operators
//! through the processor contract.

use std::sync::{Arc, Mutex};

use arrow::array::{Array, Float64Array, Int32Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use hashbrown::HashSet;

use petrel::common::ids::SlotId;
use petrel::exec::chunk::{Chunk, field_with_slot_id};
use petrel::exec::expr::{ExprArena, ExprNode};
use petrel::exec::node::join::{HashJoinNode, JoinType};
use petrel::exec::operators::hashjoin::{
    HashJoinBridge, HashJoinBuildSinkFactory, HashJoinProbeFactory, ProbePeerGroup,
};
use petrel::exec::pipeline::dependency::DependencyManager;
use petrel::exec::pipeline::operator_factory::OperatorFactory;
use petrel::exec::runtime_filter::{RuntimeFilterTarget, RuntimeInFilter};
use petrel::runtime::profile::OperatorProfiles;
use petrel::runtime::runtime_state::RuntimeState;

const PROBE_KEY: SlotId = SlotId::new(1);
const PROBE_VALUE: SlotId = SlotId::new(2);
const BUILD_KEY: SlotId = SlotId::new(3);
const BUILD_VALUE: SlotId = SlotId::new(4);

fn probe_schema_kx() -> SchemaRef {
    Arc::new(Schema::new(vec![
        field_with_slot_id(Field::new("k", DataType::Int32, true), PROBE_KEY),
        field_with_slot_id(Field::new("x", DataType::Int32, true), PROBE_VALUE),
    ]))
}

fn probe_schema_k() -> SchemaRef {
    Arc::new(Schema::new(vec![field_with_slot_id(
        Field::new("k", DataType::Int32, true),
        PROBE_KEY,
    )]))
}

fn build_schema_kv() -> SchemaRef {
    Arc::new(Schema::new(vec![
        field_with_slot_id(Field::new("bk", DataType::Int32, true), BUILD_KEY),
        field_with_slot_id(Field::new("bv", DataType::Utf8, true), BUILD_VALUE),
    ]))
}

fn build_schema_kn() -> SchemaRef {
    Arc::new(Schema::new(vec![
        field_with_slot_id(Field::new("bk", DataType::Int32, true), BUILD_KEY),
        field_with_slot_id(Field::new("by", DataType::Int32, true), BUILD_VALUE),
    ]))
}

fn probe_chunk_k(keys: Vec<Option<i32>>) -> Chunk {
    let batch = RecordBatch::try_new(
        probe_schema_k(),
        vec![Arc::new(Int32Array::from(keys))],
    )
    .expect("probe batch");
    Chunk::new(batch)
}

fn probe_chunk_kx(keys: Vec<Option<i32>>, xs: Vec<Option<i32>>) -> Chunk {
    let batch = RecordBatch::try_new(
        probe_schema_kx(),
        vec![
            Arc::new(Int32Array::from(keys)),
            Arc::new(Int32Array::from(xs)),
        ],
    )
    .expect("probe batch");
    Chunk::new(batch)
}

fn build_chunk_kv(keys: Vec<Option<i32>>, values: Vec<Option<&str>>) -> Chunk {
    let batch = RecordBatch::try_new(
        build_schema_kv(),
        vec![
            Arc::new(Int32Array::from(keys)),
            Arc::new(StringArray::from(values)),
        ],
    )
    .expect("build batch");
    Chunk::new(batch)
}

fn build_chunk_kn(keys: Vec<Option<i32>>, ys: Vec<Option<i32>>) -> Chunk {
    let batch = RecordBatch::try_new(
        build_schema_kn(),
        vec![
            Arc::new(Int32Array::from(keys)),
            Arc::new(Int32Array::from(ys)),
        ],
    )
    .expect("build batch");
    Chunk::new(batch)
}

struct JoinFixture {
    node: Arc<HashJoinNode>,
    bridge: Arc<HashJoinBridge>,
    peers: Arc<ProbePeerGroup>,
    arena: Arc<ExprArena>,
    pushdown: Option<Arc<dyn RuntimeFilterTarget>>,
}

impl JoinFixture {
    fn new(node: HashJoinNode, arena: ExprArena, num_probe_drivers: usize) -> Self {
        let dep_manager = DependencyManager::new();
        let bridge = Arc::new(HashJoinBridge::new(node.node_id, &dep_manager));
        Self {
            node: Arc::new(node),
            bridge,
            peers: Arc::new(ProbePeerGroup::new(num_probe_drivers)),
            arena: Arc::new(arena),
            pushdown: None,
        }
    }

    fn with_pushdown(mut self, target: Arc<dyn RuntimeFilterTarget>) -> Self {
        self.pushdown = Some(target);
        self
    }

    fn run_build(&self, state: &RuntimeState, chunks: Vec<Chunk>) {
        let factory =
            HashJoinBuildSinkFactory::new(Arc::clone(&self.node), Arc::clone(&self.bridge));
        let mut op = factory.create(1, 0);
        let sink = op.as_processor_mut().expect("build sink processor");
        for chunk in chunks {
            sink.push_chunk(state, chunk).expect("build push");
        }
        sink.set_finishing(state).expect("build finish");
        assert!(op.is_finished());
    }

    fn probe_factory(&self) -> HashJoinProbeFactory {
        HashJoinProbeFactory::new(
            Arc::clone(&self.node),
            Arc::clone(&self.arena),
            Arc::clone(&self.bridge),
            Arc::clone(&self.peers),
            self.pushdown.as_ref().map(Arc::clone),
        )
        .expect("probe factory")
    }

    /// Drive one probe operator over its chunks through the full lifecycle.
    fn run_probe(&self, state: &RuntimeState, driver_id: i32, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let factory = self.probe_factory();
        let mut op = factory.create(1, driver_id);
        op.prepare().expect("probe prepare");
        let proc = op.as_processor_mut().expect("probe processor");

        let mut outputs = Vec::new();
        for chunk in chunks {
            assert!(proc.precondition_dependency().is_none());
            if !proc.need_input() {
                break;
            }
            proc.push_chunk(state, chunk).expect("probe push");
            // Right-semi pulls make progress without emitting; has_output
            // drops once the input is fully consumed.
            while proc.has_output() {
                if let Some(out) = proc.pull_chunk(state).expect("probe pull") {
                    outputs.push(out);
                }
            }
        }
        proc.set_finishing(state).expect("probe finish");
        loop {
            match proc.pull_chunk(state).expect("probe pull") {
                Some(out) => outputs.push(out),
                None => break,
            }
        }
        assert!(op.is_finished());
        assert!(op.is_finished(), "finish must be stable");
        outputs
    }
}

fn int_utf8_rows(outputs: &[Chunk]) -> Vec<(Option<i32>, Option<String>)> {
    let mut rows = Vec::new();
    for chunk in outputs {
        let keys = chunk.columns()[0]
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("int column");
        let values = chunk.columns()[1]
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8 column");
        for i in 0..chunk.len() {
            let k = (!keys.is_null(i)).then(|| keys.value(i));
            let v = (!values.is_null(i)).then(|| values.value(i).to_string());
            rows.push((k, v));
        }
    }
    rows.sort();
    rows
}

fn int_rows(outputs: &[Chunk]) -> Vec<Option<i32>> {
    let mut rows = Vec::new();
    for chunk in outputs {
        let keys = chunk.columns()[0]
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("int column");
        for i in 0..chunk.len() {
            rows.push((!keys.is_null(i)).then(|| keys.value(i)));
        }
    }
    rows.sort();
    rows
}

fn join_output_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        field_with_slot_id(Field::new("k", DataType::Int32, true), PROBE_KEY),
        field_with_slot_id(Field::new("bv", DataType::Utf8, true), BUILD_VALUE),
    ]))
}

fn simple_node(join_type: JoinType, output_schema: SchemaRef) -> HashJoinNode {
    HashJoinNode {
        node_id: 7,
        join_type,
        probe_schema: probe_schema_k(),
        build_schema: build_schema_kv(),
        output_schema,
        probe_key_channels: vec![0],
        build_key_channels: vec![0],
        residual_filter: None,
    }
}

#[test]
fn inner_join_single_key_lists_all_matches() {
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(
        simple_node(JoinType::Inner, join_output_schema()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(
        &state,
        vec![build_chunk_kv(
            vec![Some(1), Some(2), Some(2)],
            vec![Some("a"), Some("b"), Some("c")],
        )],
    );
    let outputs = fixture.run_probe(
        &state,
        0,
        vec![probe_chunk_k(vec![Some(1), Some(2), Some(3)])],
    );
    assert_eq!(
        int_utf8_rows(&outputs),
        vec![
            (Some(1), Some("a".to_string())),
            (Some(2), Some("b".to_string())),
            (Some(2), Some("c".to_string())),
        ]
    );
}

#[test]
fn left_outer_pads_unmatched_probe_rows() {
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(
        simple_node(JoinType::LeftOuter, join_output_schema()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(&state, vec![build_chunk_kv(vec![Some(1)], vec![Some("a")])]);
    let outputs = fixture.run_probe(&state, 0, vec![probe_chunk_k(vec![Some(1), Some(2)])]);
    assert_eq!(
        int_utf8_rows(&outputs),
        vec![(Some(1), Some("a".to_string())), (Some(2), None)]
    );
}

#[test]
fn left_semi_emits_each_probe_row_once() {
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(
        simple_node(JoinType::LeftSemi, probe_schema_k()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(
        &state,
        vec![build_chunk_kv(
            vec![Some(1), Some(1), Some(2)],
            vec![Some("a"), Some("b"), Some("c")],
        )],
    );
    let outputs = fixture.run_probe(
        &state,
        0,
        vec![probe_chunk_k(vec![Some(1), Some(1), Some(3)])],
    );
    assert_eq!(int_rows(&outputs), vec![Some(1), Some(1)]);
}

#[test]
fn right_outer_emits_unmatched_build_rows_with_null_probe_side() {
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(
        simple_node(JoinType::RightOuter, join_output_schema()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(
        &state,
        vec![build_chunk_kv(
            vec![Some(1), Some(2)],
            vec![Some("a"), Some("b")],
        )],
    );
    let outputs = fixture.run_probe(&state, 0, vec![probe_chunk_k(vec![Some(1)])]);
    assert_eq!(
        int_utf8_rows(&outputs),
        vec![(None, Some("b".to_string())), (Some(1), Some("a".to_string()))]
    );
}

#[test]
fn full_outer_pads_both_sides() {
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(
        simple_node(JoinType::FullOuter, join_output_schema()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(
        &state,
        vec![build_chunk_kv(
            vec![Some(1), Some(2)],
            vec![Some("a"), Some("b")],
        )],
    );
    let outputs = fixture.run_probe(&state, 0, vec![probe_chunk_k(vec![Some(1), Some(3)])]);
    assert_eq!(
        int_utf8_rows(&outputs),
        vec![
            (None, Some("b".to_string())),
            (Some(1), Some("a".to_string())),
            (Some(3), None),
        ]
    );
}

#[test]
fn right_semi_emits_probed_build_rows_once() {
    let output_schema = Arc::new(Schema::new(vec![field_with_slot_id(
        Field::new("bv", DataType::Utf8, true),
        BUILD_VALUE,
    )]));
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(
        simple_node(JoinType::RightSemi, output_schema),
        ExprArena::default(),
        1,
    );
    fixture.run_build(
        &state,
        vec![build_chunk_kv(
            vec![Some(1), Some(1), Some(2)],
            vec![Some("a"), Some("b"), Some("c")],
        )],
    );
    let outputs = fixture.run_probe(
        &state,
        0,
        vec![probe_chunk_k(vec![Some(1), Some(1), Some(3)])],
    );
    let mut values = Vec::new();
    for chunk in &outputs {
        let col = chunk.columns()[0]
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8 column");
        for i in 0..chunk.len() {
            values.push(col.value(i).to_string());
        }
    }
    values.sort();
    assert_eq!(values, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn null_aware_anti_without_filter() {
    let state = RuntimeState::default();

    // Non-matching probe rows survive; a null probe key disqualifies its row.
    let fixture = JoinFixture::new(
        simple_node(JoinType::NullAwareAnti, probe_schema_k()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(
        &state,
        vec![build_chunk_kv(
            vec![Some(1), Some(2)],
            vec![Some("a"), Some("b")],
        )],
    );
    let outputs = fixture.run_probe(
        &state,
        0,
        vec![probe_chunk_k(vec![Some(1), Some(3), None])],
    );
    assert_eq!(int_rows(&outputs), vec![Some(3)]);

    // Build [(1)], probe [(2),(3)]: both probe rows survive.
    let fixture = JoinFixture::new(
        simple_node(JoinType::NullAwareAnti, probe_schema_k()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(&state, vec![build_chunk_kv(vec![Some(1)], vec![Some("a")])]);
    let outputs = fixture.run_probe(&state, 0, vec![probe_chunk_k(vec![Some(2), Some(3)])]);
    assert_eq!(int_rows(&outputs), vec![Some(2), Some(3)]);

    // Empty build side: every probe row survives, null keys included.
    let fixture = JoinFixture::new(
        simple_node(JoinType::NullAwareAnti, probe_schema_k()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(&state, vec![]);
    let outputs = fixture.run_probe(&state, 0, vec![probe_chunk_k(vec![Some(1), None])]);
    assert_eq!(int_rows(&outputs), vec![None, Some(1)]);
}

#[test]
fn null_aware_anti_with_null_build_key_short_circuits() {
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(
        simple_node(JoinType::NullAwareAnti, probe_schema_k()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(
        &state,
        vec![build_chunk_kv(vec![Some(1), None], vec![Some("a"), Some("b")])],
    );

    let factory = fixture.probe_factory();
    let mut op = factory.create(1, 0);
    op.prepare().expect("probe prepare");
    assert!(op.is_finished());
}

#[test]
fn null_aware_anti_with_filter_tests_null_key_build_rows() {
    // Filter: p.x < b.y.
    let mut arena = ExprArena::default();
    let x = arena.push_typed(ExprNode::Slot(PROBE_VALUE), DataType::Int32);
    let y = arena.push_typed(ExprNode::Slot(BUILD_VALUE), DataType::Int32);
    let filter = arena.push_typed(ExprNode::Lt(x, y), DataType::Boolean);

    let node = HashJoinNode {
        node_id: 7,
        join_type: JoinType::NullAwareAnti,
        probe_schema: probe_schema_kx(),
        build_schema: build_schema_kn(),
        output_schema: probe_schema_kx(),
        probe_key_channels: vec![0],
        build_key_channels: vec![0],
        residual_filter: Some(filter),
    };
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(node, arena, 1);
    fixture.run_build(
        &state,
        vec![build_chunk_kn(vec![Some(1), None], vec![Some(10), Some(20)])],
    );

    // Keys match no non-null build row, but the filter against the null-key
    // build row (null, 20) is 5 < 20 = true, excluding the probe row.
    let outputs = fixture.run_probe(
        &state,
        0,
        vec![probe_chunk_kx(vec![Some(5)], vec![Some(8)])],
    );
    assert!(int_rows(&outputs).is_empty());
}

#[test]
fn null_aware_anti_with_filter_emits_rows_no_build_row_satisfies() {
    let mut arena = ExprArena::default();
    let x = arena.push_typed(ExprNode::Slot(PROBE_VALUE), DataType::Int32);
    let y = arena.push_typed(ExprNode::Slot(BUILD_VALUE), DataType::Int32);
    let filter = arena.push_typed(ExprNode::Lt(x, y), DataType::Boolean);

    let node = HashJoinNode {
        node_id: 7,
        join_type: JoinType::NullAwareAnti,
        probe_schema: probe_schema_kx(),
        build_schema: build_schema_kn(),
        output_schema: probe_schema_kx(),
        probe_key_channels: vec![0],
        build_key_channels: vec![0],
        residual_filter: Some(filter),
    };
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(node, arena, 1);
    fixture.run_build(
        &state,
        vec![build_chunk_kn(vec![Some(1), None], vec![Some(10), Some(20)])],
    );

    // 100 < 10 and 100 < 20 are both false: no build row satisfies the
    // condition, the probe row is an anti match.
    let outputs = fixture.run_probe(
        &state,
        0,
        vec![probe_chunk_kx(vec![Some(5)], vec![Some(100)])],
    );
    let rows = int_rows(&outputs);
    assert_eq!(rows, vec![Some(5)]);
}

#[test]
fn left_outer_with_filter_flushes_tracker_across_output_batches() {
    // Filter: p.x < b.y; small output batches force the cursor to span pulls.
    let mut arena = ExprArena::default();
    let x = arena.push_typed(ExprNode::Slot(PROBE_VALUE), DataType::Int32);
    let y = arena.push_typed(ExprNode::Slot(BUILD_VALUE), DataType::Int32);
    let filter = arena.push_typed(ExprNode::Lt(x, y), DataType::Boolean);

    let output_schema = Arc::new(Schema::new(vec![
        field_with_slot_id(Field::new("k", DataType::Int32, true), PROBE_KEY),
        field_with_slot_id(Field::new("by", DataType::Int32, true), BUILD_VALUE),
    ]));
    let node = HashJoinNode {
        node_id: 7,
        join_type: JoinType::LeftOuter,
        probe_schema: probe_schema_kx(),
        build_schema: build_schema_kn(),
        output_schema,
        probe_key_channels: vec![0],
        build_key_channels: vec![0],
        residual_filter: Some(filter),
    };
    let state = RuntimeState::with_chunk_size(2);
    let fixture = JoinFixture::new(node, arena, 1);
    fixture.run_build(
        &state,
        vec![build_chunk_kn(
            vec![Some(1), Some(1), Some(1), Some(2)],
            vec![Some(5), Some(15), Some(25), Some(30)],
        )],
    );

    // Probe row (1, 20) keeps only build y=25; row (2, 50) matches key 2 but
    // fails the filter and falls back to a null-padded row; row (3, 0) has no
    // key match at all.
    let outputs = fixture.run_probe(
        &state,
        0,
        vec![probe_chunk_kx(
            vec![Some(1), Some(2), Some(3)],
            vec![Some(20), Some(50), Some(0)],
        )],
    );
    let mut rows = Vec::new();
    for chunk in &outputs {
        let k = chunk.columns()[0]
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        let by = chunk.columns()[1]
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        for i in 0..chunk.len() {
            rows.push((
                (!k.is_null(i)).then(|| k.value(i)),
                (!by.is_null(i)).then(|| by.value(i)),
            ));
        }
    }
    rows.sort();
    assert_eq!(
        rows,
        vec![
            (Some(1), Some(25)),
            (Some(2), None),
            (Some(3), None),
        ]
    );
}

#[test]
fn result_cursor_is_monotone_across_output_batches() {
    let state = RuntimeState::with_chunk_size(2);
    let fixture = JoinFixture::new(
        simple_node(JoinType::Inner, join_output_schema()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(
        &state,
        vec![build_chunk_kv(
            vec![Some(1), Some(1), Some(1), Some(2), Some(2)],
            vec![Some("a"), Some("b"), Some("c"), Some("d"), Some("e")],
        )],
    );
    let outputs = fixture.run_probe(&state, 0, vec![probe_chunk_k(vec![Some(1), Some(2)])]);
    assert!(outputs.len() > 1, "expected multiple output batches");
    let mut last_first_key = i32::MIN;
    for chunk in &outputs {
        assert!(chunk.len() <= 2);
        let keys = chunk.columns()[0]
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        // First probe key of each batch is non-decreasing across batches.
        assert!(keys.value(0) >= last_first_key);
        last_first_key = keys.value(0);
    }
}

#[test]
fn empty_build_short_circuits_inner_and_feeds_left_outer() {
    let state = RuntimeState::default();

    // Inner: finished before any input.
    let fixture = JoinFixture::new(
        simple_node(JoinType::Inner, join_output_schema()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(&state, vec![]);
    let factory = fixture.probe_factory();
    let mut op = factory.create(1, 0);
    op.prepare().expect("probe prepare");
    assert!(op.is_finished());

    // Left outer: all probe rows with null build columns, nulls included.
    let fixture = JoinFixture::new(
        simple_node(JoinType::LeftOuter, join_output_schema()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(&state, vec![]);
    let outputs = fixture.run_probe(&state, 0, vec![probe_chunk_k(vec![Some(1), None])]);
    assert_eq!(int_utf8_rows(&outputs), vec![(None, None), (Some(1), None)]);
}

#[test]
fn probe_blocks_until_build_is_published() {
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(
        simple_node(JoinType::Inner, join_output_schema()),
        ExprArena::default(),
        1,
    );

    let factory = fixture.probe_factory();
    let mut op = factory.create(1, 0);
    op.prepare().expect("probe prepare");
    {
        let proc = op.as_processor_mut().expect("probe processor");
        let dep = proc.precondition_dependency().expect("build dependency");
        assert!(!dep.is_ready());
        assert!(!proc.need_input());
    }

    fixture.run_build(&state, vec![build_chunk_kv(vec![Some(1)], vec![Some("a")])]);
    let proc = op.as_processor_mut().expect("probe processor");
    assert!(proc.precondition_dependency().is_none());
    assert!(proc.need_input());
    proc.push_chunk(&state, probe_chunk_k(vec![Some(1)]))
        .expect("probe push");
    let out = proc.pull_chunk(&state).expect("probe pull").expect("chunk");
    assert_eq!(out.len(), 1);
}

#[test]
fn right_outer_last_driver_emits_build_side() {
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(
        simple_node(JoinType::RightOuter, join_output_schema()),
        ExprArena::default(),
        2,
    );
    fixture.run_build(
        &state,
        vec![build_chunk_kv(
            vec![Some(1), Some(2), Some(3)],
            vec![Some("a"), Some("b"), Some("c")],
        )],
    );

    let outputs_a = fixture.run_probe(&state, 0, vec![probe_chunk_k(vec![Some(1)])]);
    let outputs_b = fixture.run_probe(&state, 1, vec![probe_chunk_k(vec![Some(2)])]);

    // Driver 0 finished first and only emitted its matches; driver 1 won the
    // barrier and emitted the leftover build row.
    assert_eq!(
        int_utf8_rows(&outputs_a),
        vec![(Some(1), Some("a".to_string()))]
    );
    assert_eq!(
        int_utf8_rows(&outputs_b),
        vec![(None, Some("c".to_string())), (Some(2), Some("b".to_string()))]
    );
}

#[derive(Default)]
struct RecordingFilterTarget {
    accepted: Mutex<HashSet<SlotId>>,
    received: Mutex<Vec<RuntimeInFilter>>,
}

impl RecordingFilterTarget {
    fn accepting(slots: &[SlotId]) -> Arc<Self> {
        let target = Self::default();
        {
            let mut guard = target.accepted.lock().unwrap();
            for slot in slots {
                guard.insert(*slot);
            }
        }
        Arc::new(target)
    }
}

impl RuntimeFilterTarget for RecordingFilterTarget {
    fn can_pushdown_filters(&self, probe_slots: &[SlotId]) -> HashSet<SlotId> {
        let accepted = self.accepted.lock().unwrap();
        probe_slots
            .iter()
            .copied()
            .filter(|slot| accepted.contains(slot))
            .collect()
    }

    fn add_runtime_filter(&self, _slot_id: SlotId, filter: RuntimeInFilter) {
        self.received.lock().unwrap().push(filter);
    }
}

#[test]
fn runtime_filter_derivation_elides_the_join() {
    let state = RuntimeState::default();
    let target = RecordingFilterTarget::accepting(&[PROBE_KEY]);
    // Output projects probe columns only; build keys are unique.
    let fixture = JoinFixture::new(
        simple_node(JoinType::Inner, probe_schema_k()),
        ExprArena::default(),
        1,
    )
    .with_pushdown(Arc::clone(&target) as Arc<dyn RuntimeFilterTarget>);
    fixture.run_build(
        &state,
        vec![build_chunk_kv(
            vec![Some(1), Some(2)],
            vec![Some("a"), Some("b")],
        )],
    );

    let factory = fixture.probe_factory();
    let mut op = factory.create(1, 0);
    let profiles = OperatorProfiles::new("HASH_JOIN_PROBE");
    op.set_profiles(profiles.clone());
    op.prepare().expect("probe prepare");

    {
        let received = target.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].slot_id(), PROBE_KEY);
        assert_eq!(received[0].num_values(), 2);
    }

    op.clear_runtime_filters();
    let proc = op.as_processor_mut().expect("probe processor");
    // The pushed filter already removed non-matching rows upstream; the join
    // passes input through unchanged.
    proc.push_chunk(&state, probe_chunk_k(vec![Some(1), Some(2)]))
        .expect("probe push");
    let out = proc.pull_chunk(&state).expect("probe pull").expect("chunk");
    assert_eq!(out.len(), 2);
    assert_eq!(int_rows(&[out]), vec![Some(1), Some(2)]);
    assert_eq!(
        profiles
            .common
            .counter_value("ReplacedWithRuntimeFilterRows"),
        Some(2)
    );
}

#[test]
fn inner_join_on_float_key_runs_in_hash_mode() {
    // Float keys never get value ids, forcing hash-mode lookup with
    // serialized-key verification.
    let probe_schema = Arc::new(Schema::new(vec![field_with_slot_id(
        Field::new("fk", DataType::Float64, true),
        PROBE_KEY,
    )]));
    let build_schema = Arc::new(Schema::new(vec![
        field_with_slot_id(Field::new("fbk", DataType::Float64, true), BUILD_KEY),
        field_with_slot_id(Field::new("bv", DataType::Utf8, true), BUILD_VALUE),
    ]));
    let output_schema = Arc::new(Schema::new(vec![
        field_with_slot_id(Field::new("fk", DataType::Float64, true), PROBE_KEY),
        field_with_slot_id(Field::new("bv", DataType::Utf8, true), BUILD_VALUE),
    ]));
    let node = HashJoinNode {
        node_id: 7,
        join_type: JoinType::Inner,
        probe_schema: Arc::clone(&probe_schema),
        build_schema: Arc::clone(&build_schema),
        output_schema,
        probe_key_channels: vec![0],
        build_key_channels: vec![0],
        residual_filter: None,
    };
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(node, ExprArena::default(), 1);

    let build = RecordBatch::try_new(
        build_schema,
        vec![
            Arc::new(Float64Array::from(vec![Some(1.5), Some(2.5)])),
            Arc::new(StringArray::from(vec![Some("a"), Some("b")])),
        ],
    )
    .expect("build batch");
    fixture.run_build(&state, vec![Chunk::new(build)]);

    let probe = RecordBatch::try_new(
        probe_schema,
        vec![Arc::new(Float64Array::from(vec![Some(1.5), Some(3.5)]))],
    )
    .expect("probe batch");
    let outputs = fixture.run_probe(&state, 0, vec![Chunk::new(probe)]);

    let mut rows = Vec::new();
    for chunk in &outputs {
        let fk = chunk.columns()[0]
            .as_any()
            .downcast_ref::<Float64Array>()
            .expect("float column");
        let bv = chunk.columns()[1]
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8 column");
        for i in 0..chunk.len() {
            rows.push((fk.value(i).to_bits(), bv.value(i).to_string()));
        }
    }
    assert_eq!(rows, vec![(1.5f64.to_bits(), "a".to_string())]);
}

#[test]
fn inner_join_multi_key_uses_both_columns() {
    let probe_schema = probe_schema_kx();
    let build_schema = build_schema_kn();
    let output_schema = Arc::new(Schema::new(vec![
        field_with_slot_id(Field::new("k", DataType::Int32, true), PROBE_KEY),
        field_with_slot_id(Field::new("x", DataType::Int32, true), PROBE_VALUE),
    ]));
    let node = HashJoinNode {
        node_id: 7,
        join_type: JoinType::Inner,
        probe_schema,
        build_schema,
        output_schema,
        probe_key_channels: vec![0, 1],
        build_key_channels: vec![0, 1],
        residual_filter: None,
    };
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(node, ExprArena::default(), 1);
    fixture.run_build(
        &state,
        vec![build_chunk_kn(
            vec![Some(1), Some(1), Some(2)],
            vec![Some(10), Some(20), Some(10)],
        )],
    );
    let outputs = fixture.run_probe(
        &state,
        0,
        vec![probe_chunk_kx(
            vec![Some(1), Some(1), Some(2)],
            vec![Some(10), Some(30), Some(20)],
        )],
    );
    let mut rows = Vec::new();
    for chunk in &outputs {
        let k = chunk.columns()[0]
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        let x = chunk.columns()[1]
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        for i in 0..chunk.len() {
            rows.push((k.value(i), x.value(i)));
        }
    }
    rows.sort();
    assert_eq!(rows, vec![(1, 10)]);
}

#[test]
fn inner_join_with_residual_filter_drops_failing_pairs() {
    let mut arena = ExprArena::default();
    let x = arena.push_typed(ExprNode::Slot(PROBE_VALUE), DataType::Int32);
    let y = arena.push_typed(ExprNode::Slot(BUILD_VALUE), DataType::Int32);
    let filter = arena.push_typed(ExprNode::Lt(x, y), DataType::Boolean);

    let output_schema = Arc::new(Schema::new(vec![
        field_with_slot_id(Field::new("k", DataType::Int32, true), PROBE_KEY),
        field_with_slot_id(Field::new("by", DataType::Int32, true), BUILD_VALUE),
    ]));
    let node = HashJoinNode {
        node_id: 7,
        join_type: JoinType::Inner,
        probe_schema: probe_schema_kx(),
        build_schema: build_schema_kn(),
        output_schema,
        probe_key_channels: vec![0],
        build_key_channels: vec![0],
        residual_filter: Some(filter),
    };
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(node, arena, 1);
    fixture.run_build(
        &state,
        vec![build_chunk_kn(
            vec![Some(1), Some(1)],
            vec![Some(5), Some(20)],
        )],
    );
    let outputs = fixture.run_probe(
        &state,
        0,
        vec![probe_chunk_kx(vec![Some(1), Some(1)], vec![Some(10), Some(50)])],
    );
    let mut rows = Vec::new();
    for chunk in &outputs {
        let k = chunk.columns()[0]
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        let by = chunk.columns()[1]
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        for i in 0..chunk.len() {
            rows.push((k.value(i), by.value(i)));
        }
    }
    rows.sort();
    assert_eq!(rows, vec![(1, 20)]);
}

#[test]
fn probe_input_split_across_chunks_keeps_per_chunk_semantics() {
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(
        simple_node(JoinType::LeftOuter, join_output_schema()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(
        &state,
        vec![
            build_chunk_kv(vec![Some(1)], vec![Some("a")]),
            build_chunk_kv(vec![Some(2)], vec![Some("b")]),
        ],
    );
    let outputs = fixture.run_probe(
        &state,
        0,
        vec![
            probe_chunk_k(vec![Some(1), Some(9)]),
            probe_chunk_k(vec![Some(2)]),
        ],
    );
    assert_eq!(
        int_utf8_rows(&outputs),
        vec![
            (Some(1), Some("a".to_string())),
            (Some(2), Some("b".to_string())),
            (Some(9), None),
        ]
    );
}

#[test]
fn left_semi_join_counter_and_profile_metadata() {
    let state = RuntimeState::default();
    let fixture = JoinFixture::new(
        simple_node(JoinType::LeftSemi, probe_schema_k()),
        ExprArena::default(),
        1,
    );
    fixture.run_build(&state, vec![build_chunk_kv(vec![Some(1)], vec![Some("a")])]);

    let factory = fixture.probe_factory();
    let mut op = factory.create(1, 0);
    let profiles = OperatorProfiles::new("HASH_JOIN_PROBE");
    op.set_profiles(profiles.clone());
    op.prepare().expect("probe prepare");
    let proc = op.as_processor_mut().expect("probe processor");
    proc.push_chunk(&state, probe_chunk_k(vec![Some(1), Some(2)]))
        .expect("probe push");
    let out = proc.pull_chunk(&state).expect("probe pull").expect("chunk");
    assert_eq!(out.len(), 1);
    assert_eq!(
        profiles.common.info_string("JoinType"),
        Some("LEFT_SEMI".to_string())
    );
    // No elision happened, the counter stays unset.
    assert_eq!(
        profiles
            .common
            .counter_value("ReplacedWithRuntimeFilterRows"),
        None
    );
}
