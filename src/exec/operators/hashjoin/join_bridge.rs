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
//! Build/probe rendezvous for one hash join.
//!
//! Responsibilities:
//! - Publishes the finished build result once and wakes blocked probe drivers
//!   through the join-build dependency.
//! - Elects the single probe driver responsible for unmatched-build emission at
//!   end of input.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::join_hash_table::JoinHashTable;
use crate::exec::pipeline::dependency::{DependencyHandle, DependencyManager};

/// Outcome of the build side, shared read-only by all probe drivers.
pub struct HashBuildResult {
    pub table: Arc<JoinHashTable>,
    /// Null-aware anti join without a residual filter saw a null build key;
    /// the join result is empty regardless of probe input.
    pub anti_join_has_null_keys: bool,
}

/// Rendezvous object pairing one build sink with the probe drivers of a plan node.
pub struct HashJoinBridge {
    dep: DependencyHandle,
    build: Mutex<Option<Arc<HashBuildResult>>>,
}

impl HashJoinBridge {
    pub fn new(node_id: i32, dep_manager: &DependencyManager) -> Self {
        let dep = dep_manager.get_or_create(format!("join_build:{}", node_id));
        Self {
            dep,
            build: Mutex::new(None),
        }
    }

    pub fn dep(&self) -> DependencyHandle {
        self.dep.clone()
    }

    pub fn dep_name(&self) -> &str {
        self.dep.name()
    }

    /// Publish the build result; probe drivers blocked on the dependency resume.
    pub fn publish(&self, result: HashBuildResult) -> Result<(), String> {
        {
            let mut guard = self.build.lock().unwrap_or_else(|e| e.into_inner());
            if guard.is_some() {
                return Err("join build already published".to_string());
            }
            *guard = Some(Arc::new(result));
        }
        self.dep.set_ready();
        Ok(())
    }

    pub fn build(&self) -> Option<Arc<HashBuildResult>> {
        let guard = self.build.lock().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    pub fn has_build(&self) -> bool {
        let guard = self.build.lock().unwrap_or_else(|e| e.into_inner());
        guard.is_some()
    }
}

/// Barrier over the probe drivers of one plan node.
///
/// Each driver reports once when its input stream ends; the final reporter wins
/// and takes over unmatched-build emission.
pub struct ProbePeerGroup {
    num_drivers: usize,
    finished: AtomicUsize,
}

impl ProbePeerGroup {
    pub fn new(num_drivers: usize) -> Self {
        Self {
            num_drivers: num_drivers.max(1),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn num_drivers(&self) -> usize {
        self.num_drivers
    }

    /// Report this driver finished; true exactly once, for the last reporter.
    pub fn all_peers_finished(&self) -> Result<bool, String> {
        let done = self.finished.fetch_add(1, Ordering::AcqRel) + 1;
        if done > self.num_drivers {
            return Err(format!(
                "probe peer group over-reported: {} finishes for {} drivers",
                done, self.num_drivers
            ));
        }
        Ok(done == self.num_drivers)
    }
}
