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
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, BooleanBuilder};
use arrow::compute::cast;
use arrow::compute::kernels::boolean::not;
use arrow::compute::kernels::cmp::{eq, gt, gt_eq, lt, lt_eq, neq};

use super::{ExprArena, ExprId};
use crate::exec::chunk::Chunk;

fn normalize_comparison_types(
    left: ArrayRef,
    right: ArrayRef,
) -> Result<(ArrayRef, ArrayRef), String> {
    if left.data_type() == right.data_type() {
        return Ok((left, right));
    }
    let casted = cast(&right, left.data_type()).map_err(|e| {
        format!(
            "comparison type mismatch: {:?} vs {:?}: {}",
            left.data_type(),
            right.data_type(),
            e
        )
    })?;
    Ok((left, casted))
}

macro_rules! compare_eval {
    ($name:ident, $kernel:ident) => {
        pub(super) fn $name(
            arena: &ExprArena,
            left: ExprId,
            right: ExprId,
            chunk: &Chunk,
        ) -> Result<ArrayRef, String> {
            let l = arena.eval(left, chunk)?;
            let r = arena.eval(right, chunk)?;
            let (l_norm, r_norm) = normalize_comparison_types(l, r)?;
            let result = $kernel(&l_norm, &r_norm).map_err(|e| e.to_string())?;
            Ok(Arc::new(result))
        }
    };
}

compare_eval!(eval_eq, eq);
compare_eval!(eval_ne, neq);
compare_eval!(eval_lt, lt);
compare_eval!(eval_le, lt_eq);
compare_eval!(eval_gt, gt);
compare_eval!(eval_ge, gt_eq);

fn as_boolean(array: &ArrayRef, op: &str) -> Result<BooleanArray, String> {
    array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .cloned()
        .ok_or_else(|| format!("{} operand must be boolean", op))
}

// SQL three-valued logic:
//   FALSE AND NULL = FALSE, TRUE AND NULL = NULL
//   TRUE  OR  NULL = TRUE,  FALSE OR NULL = NULL
pub(super) fn eval_and(
    arena: &ExprArena,
    left: ExprId,
    right: ExprId,
    chunk: &Chunk,
) -> Result<ArrayRef, String> {
    let l = as_boolean(&arena.eval(left, chunk)?, "AND")?;
    let r = as_boolean(&arena.eval(right, chunk)?, "AND")?;
    let mut builder = BooleanBuilder::with_capacity(l.len());
    for i in 0..l.len() {
        match (l.is_null(i), r.is_null(i)) {
            (false, false) => builder.append_value(l.value(i) && r.value(i)),
            (false, true) => {
                if !l.value(i) {
                    builder.append_value(false);
                } else {
                    builder.append_null();
                }
            }
            (true, false) => {
                if !r.value(i) {
                    builder.append_value(false);
                } else {
                    builder.append_null();
                }
            }
            (true, true) => builder.append_null(),
        }
    }
    Ok(Arc::new(builder.finish()))
}

pub(super) fn eval_or(
    arena: &ExprArena,
    left: ExprId,
    right: ExprId,
    chunk: &Chunk,
) -> Result<ArrayRef, String> {
    let l = as_boolean(&arena.eval(left, chunk)?, "OR")?;
    let r = as_boolean(&arena.eval(right, chunk)?, "OR")?;
    let mut builder = BooleanBuilder::with_capacity(l.len());
    for i in 0..l.len() {
        match (l.is_null(i), r.is_null(i)) {
            (false, false) => builder.append_value(l.value(i) || r.value(i)),
            (false, true) => {
                if l.value(i) {
                    builder.append_value(true);
                } else {
                    builder.append_null();
                }
            }
            (true, false) => {
                if r.value(i) {
                    builder.append_value(true);
                } else {
                    builder.append_null();
                }
            }
            (true, true) => builder.append_null(),
        }
    }
    Ok(Arc::new(builder.finish()))
}

pub(super) fn eval_not(
    arena: &ExprArena,
    child: ExprId,
    chunk: &Chunk,
) -> Result<ArrayRef, String> {
    let c = as_boolean(&arena.eval(child, chunk)?, "NOT")?;
    let result = not(&c).map_err(|e| e.to_string())?;
    Ok(Arc::new(result))
}

pub(super) fn eval_is_null(
    arena: &ExprArena,
    child: ExprId,
    chunk: &Chunk,
) -> Result<ArrayRef, String> {
    let c = arena.eval(child, chunk)?;
    let mut builder = BooleanBuilder::with_capacity(c.len());
    for i in 0..c.len() {
        builder.append_value(c.is_null(i));
    }
    Ok(Arc::new(builder.finish()))
}

pub(super) fn eval_is_not_null(
    arena: &ExprArena,
    child: ExprId,
    chunk: &Chunk,
) -> Result<ArrayRef, String> {
    let c = arena.eval(child, chunk)?;
    let mut builder = BooleanBuilder::with_capacity(c.len());
    for i in 0..c.len() {
        builder.append_value(!c.is_null(i));
    }
    Ok(Arc::new(builder.finish()))
}
