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
use crate::exec::pipeline::operator::Operator;

/// Creates one operator instance per pipeline driver.
pub trait OperatorFactory: Send + Sync {
    fn name(&self) -> &str;

    /// `dop` is the degree of parallelism of the pipeline; `driver_id` is the
    /// index of the driver this instance belongs to.
    fn create(&self, dop: i32, driver_id: i32) -> Box<dyn Operator>;

    fn is_sink(&self) -> bool {
        false
    }
}
