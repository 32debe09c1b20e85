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
//! Arena-based expression evaluation over Arrow arrays.
//!
//! Responsibilities:
//! - Evaluates typed expression trees (slots, literals, arithmetic, comparisons,
//!   boolean logic, null tests) against one chunk.
//! - Reports per-expression referenced slots and null-propagation, which join
//!   residual filters rely on.

mod arithmetic;
mod comparison;
mod literal;
mod slot;

use crate::common::ids::SlotId;
use crate::exec::chunk::Chunk;
use arrow::array::{ArrayRef, new_null_array};
use arrow::datatypes::DataType;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ExprId(pub usize);

#[derive(Clone, Debug)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

#[derive(Clone, Debug)]
pub enum ExprNode {
    Literal(LiteralValue),
    /// Reference to a column by slot id.
    Slot(SlotId),
    Add(ExprId, ExprId),
    Sub(ExprId, ExprId),
    Mul(ExprId, ExprId),
    Div(ExprId, ExprId),
    Eq(ExprId, ExprId),
    Ne(ExprId, ExprId),
    Lt(ExprId, ExprId),
    Le(ExprId, ExprId),
    Gt(ExprId, ExprId),
    Ge(ExprId, ExprId),
    And(ExprId, ExprId),
    Or(ExprId, ExprId),
    Not(ExprId),
    IsNull(ExprId),
    IsNotNull(ExprId),
}

#[derive(Clone, Debug, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
    types: Vec<DataType>,
}

impl ExprArena {
    pub fn push(&mut self, node: ExprNode) -> ExprId {
        self.push_typed(node, DataType::Null)
    }

    pub fn push_typed(&mut self, node: ExprNode, data_type: DataType) -> ExprId {
        let id = ExprId(self.nodes.len());
        self.nodes.push(node);
        self.types.push(data_type);
        id
    }

    pub fn node(&self, id: ExprId) -> Option<&ExprNode> {
        self.nodes.get(id.0)
    }

    pub fn data_type(&self, id: ExprId) -> Option<&DataType> {
        self.types.get(id.0)
    }

    pub fn eval(&self, id: ExprId, chunk: &Chunk) -> Result<ArrayRef, String> {
        let node = self
            .nodes
            .get(id.0)
            .ok_or_else(|| "invalid ExprId".to_string())?;
        match node {
            ExprNode::Literal(v) => {
                if matches!(v, LiteralValue::Null) {
                    let target_type = self.data_type(id).cloned().unwrap_or(DataType::Null);
                    if !matches!(target_type, DataType::Null) {
                        // Preserve the declared type so downstream kernels see typed nulls.
                        return Ok(new_null_array(&target_type, chunk.len()));
                    }
                }
                literal::eval(v, chunk.len())
            }
            ExprNode::Slot(slot_id) => slot::eval_slot(*slot_id, chunk),
            ExprNode::Add(a, b) => arithmetic::eval_add(self, *a, *b, chunk),
            ExprNode::Sub(a, b) => arithmetic::eval_sub(self, *a, *b, chunk),
            ExprNode::Mul(a, b) => arithmetic::eval_mul(self, *a, *b, chunk),
            ExprNode::Div(a, b) => arithmetic::eval_div(self, *a, *b, chunk),
            ExprNode::Eq(a, b) => comparison::eval_eq(self, *a, *b, chunk),
            ExprNode::Ne(a, b) => comparison::eval_ne(self, *a, *b, chunk),
            ExprNode::Lt(a, b) => comparison::eval_lt(self, *a, *b, chunk),
            ExprNode::Le(a, b) => comparison::eval_le(self, *a, *b, chunk),
            ExprNode::Gt(a, b) => comparison::eval_gt(self, *a, *b, chunk),
            ExprNode::Ge(a, b) => comparison::eval_ge(self, *a, *b, chunk),
            ExprNode::And(a, b) => comparison::eval_and(self, *a, *b, chunk),
            ExprNode::Or(a, b) => comparison::eval_or(self, *a, *b, chunk),
            ExprNode::Not(child) => comparison::eval_not(self, *child, chunk),
            ExprNode::IsNull(child) => comparison::eval_is_null(self, *child, chunk),
            ExprNode::IsNotNull(child) => comparison::eval_is_not_null(self, *child, chunk),
        }
    }

    /// Distinct slot ids referenced by the expression tree, in ascending order.
    pub fn distinct_slots(&self, id: ExprId) -> Result<Vec<SlotId>, String> {
        let mut slots = Vec::new();
        self.collect_slots(id, &mut slots)?;
        slots.sort();
        slots.dedup();
        Ok(slots)
    }

    fn collect_slots(&self, id: ExprId, out: &mut Vec<SlotId>) -> Result<(), String> {
        let node = self
            .nodes
            .get(id.0)
            .ok_or_else(|| "invalid ExprId".to_string())?;
        match node {
            ExprNode::Literal(_) => {}
            ExprNode::Slot(slot_id) => out.push(*slot_id),
            ExprNode::Add(a, b)
            | ExprNode::Sub(a, b)
            | ExprNode::Mul(a, b)
            | ExprNode::Div(a, b)
            | ExprNode::Eq(a, b)
            | ExprNode::Ne(a, b)
            | ExprNode::Lt(a, b)
            | ExprNode::Le(a, b)
            | ExprNode::Gt(a, b)
            | ExprNode::Ge(a, b)
            | ExprNode::And(a, b)
            | ExprNode::Or(a, b) => {
                self.collect_slots(*a, out)?;
                self.collect_slots(*b, out)?;
            }
            ExprNode::Not(child) | ExprNode::IsNull(child) | ExprNode::IsNotNull(child) => {
                self.collect_slots(*child, out)?;
            }
        }
        Ok(())
    }

    /// Whether a null in any referenced slot forces a null result.
    ///
    /// Arithmetic, comparisons and NOT propagate nulls; three-valued AND/OR and the
    /// null tests can absorb them.
    pub fn propagates_nulls(&self, id: ExprId) -> Result<bool, String> {
        let node = self
            .nodes
            .get(id.0)
            .ok_or_else(|| "invalid ExprId".to_string())?;
        match node {
            ExprNode::Literal(_) | ExprNode::Slot(_) => Ok(true),
            ExprNode::Add(a, b)
            | ExprNode::Sub(a, b)
            | ExprNode::Mul(a, b)
            | ExprNode::Div(a, b)
            | ExprNode::Eq(a, b)
            | ExprNode::Ne(a, b)
            | ExprNode::Lt(a, b)
            | ExprNode::Le(a, b)
            | ExprNode::Gt(a, b)
            | ExprNode::Ge(a, b) => {
                Ok(self.propagates_nulls(*a)? && self.propagates_nulls(*b)?)
            }
            ExprNode::And(_, _) | ExprNode::Or(_, _) => Ok(false),
            ExprNode::Not(child) => self.propagates_nulls(*child),
            ExprNode::IsNull(_) | ExprNode::IsNotNull(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::chunk::field_with_slot_id;
    use arrow::array::{Array, BooleanArray, Int32Array, RecordBatch};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn chunk_one_col(values: Vec<Option<i32>>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![field_with_slot_id(
            Field::new("x", DataType::Int32, true),
            SlotId::new(1),
        )]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap();
        Chunk::new(batch)
    }

    #[test]
    fn lt_with_literal_keeps_nulls() {
        let mut arena = ExprArena::default();
        let x = arena.push_typed(ExprNode::Slot(SlotId::new(1)), DataType::Int32);
        let five = arena.push_typed(
            ExprNode::Literal(LiteralValue::Int32(5)),
            DataType::Int32,
        );
        let lt = arena.push_typed(ExprNode::Lt(x, five), DataType::Boolean);

        let chunk = chunk_one_col(vec![Some(3), None, Some(7)]);
        let out = arena.eval(lt, &chunk).unwrap();
        let out = out.as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(out.value(0));
        assert!(out.is_null(1));
        assert!(!out.value(2));
    }

    #[test]
    fn distinct_slots_dedups_and_sorts() {
        let mut arena = ExprArena::default();
        let a = arena.push_typed(ExprNode::Slot(SlotId::new(7)), DataType::Int32);
        let b = arena.push_typed(ExprNode::Slot(SlotId::new(2)), DataType::Int32);
        let sum = arena.push_typed(ExprNode::Add(a, b), DataType::Int32);
        let expr = arena.push_typed(ExprNode::Lt(sum, a), DataType::Boolean);
        assert_eq!(
            arena.distinct_slots(expr).unwrap(),
            vec![SlotId::new(2), SlotId::new(7)]
        );
    }

    #[test]
    fn null_propagation_judgment() {
        let mut arena = ExprArena::default();
        let a = arena.push_typed(ExprNode::Slot(SlotId::new(1)), DataType::Int32);
        let b = arena.push_typed(ExprNode::Slot(SlotId::new(2)), DataType::Int32);
        let lt = arena.push_typed(ExprNode::Lt(a, b), DataType::Boolean);
        assert!(arena.propagates_nulls(lt).unwrap());

        let is_null = arena.push_typed(ExprNode::IsNull(a), DataType::Boolean);
        assert!(!arena.propagates_nulls(is_null).unwrap());

        let or = arena.push_typed(ExprNode::Or(lt, is_null), DataType::Boolean);
        assert!(!arena.propagates_nulls(or).unwrap());
    }
}
