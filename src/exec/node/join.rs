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
use arrow::datatypes::SchemaRef;

use crate::exec::expr::ExprId;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    LeftSemi,
    RightSemi,
    /// Anti join with SQL `NOT IN` null semantics: a null key on either side
    /// makes the membership test unknown.
    NullAwareAnti,
}

impl JoinType {
    /// Build rows participating in a match must be flagged so end-of-input
    /// emission can enumerate the (non-)probed remainder.
    pub fn needs_probed_flags(self) -> bool {
        matches!(
            self,
            JoinType::RightOuter | JoinType::FullOuter | JoinType::RightSemi
        )
    }

    /// The result iterator must synthesize a miss pair for probe rows whose
    /// hit chain is empty.
    pub fn lists_misses(self) -> bool {
        matches!(
            self,
            JoinType::LeftOuter | JoinType::FullOuter | JoinType::NullAwareAnti
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::LeftOuter => "LEFT_OUTER",
            JoinType::RightOuter => "RIGHT_OUTER",
            JoinType::FullOuter => "FULL_OUTER",
            JoinType::LeftSemi => "LEFT_SEMI",
            JoinType::RightSemi => "RIGHT_SEMI",
            JoinType::NullAwareAnti => "NULL_AWARE_ANTI",
        }
    }
}

/// Plan-level description of one hash join, shared by the build and probe factories.
#[derive(Clone, Debug)]
pub struct HashJoinNode {
    pub node_id: i32,
    pub join_type: JoinType,
    /// Schema of the streamed (probe) input, slot-id addressed.
    pub probe_schema: SchemaRef,
    /// Schema of the materialized (build) input, slot-id addressed.
    pub build_schema: SchemaRef,
    /// Schema of the join output; every field must resolve to a probe or build
    /// field by slot id.
    pub output_schema: SchemaRef,
    /// Probe-side equality key column indices, aligned with `build_key_channels`.
    pub probe_key_channels: Vec<usize>,
    /// Build-side equality key column indices.
    pub build_key_channels: Vec<usize>,
    /// Residual conjunct evaluated over probe+build columns after key equality.
    pub residual_filter: Option<ExprId>,
}
