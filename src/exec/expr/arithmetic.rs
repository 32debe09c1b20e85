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
use arrow::array::ArrayRef;
use arrow::compute::kernels::numeric::{add, div, mul, sub};

use super::{ExprArena, ExprId};
use crate::exec::chunk::Chunk;

macro_rules! arith_eval {
    ($name:ident, $kernel:ident) => {
        pub(super) fn $name(
            arena: &ExprArena,
            left: ExprId,
            right: ExprId,
            chunk: &Chunk,
        ) -> Result<ArrayRef, String> {
            let l = arena.eval(left, chunk)?;
            let r = arena.eval(right, chunk)?;
            $kernel(&l, &r).map_err(|e| e.to_string())
        }
    };
}

arith_eval!(eval_add, add);
arith_eval!(eval_sub, sub);
arith_eval!(eval_mul, mul);
arith_eval!(eval_div, div);
