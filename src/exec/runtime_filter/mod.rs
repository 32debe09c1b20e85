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
//! Runtime filters derived from join build sides.
//!
//! Responsibilities:
//! - Exact-value IN filters over probe key columns, built from the build-side
//!   distinct key sets.
//! - The pushdown contract through which a probe operator offers filters to
//!   upstream operators.

mod in_filter;

use hashbrown::HashSet;

use crate::common::ids::SlotId;

pub use in_filter::{RuntimeInFilter, RuntimeInFilterValues};

/// Upstream-facing half of runtime-filter pushdown.
///
/// A probe operator asks which of its key slots the upstream plan can filter
/// on, then hands over one IN filter per accepted slot. The implementation is
/// owned by the driver framework (typically a scan operator registry).
pub trait RuntimeFilterTarget: Send + Sync {
    /// Subset of `probe_slots` that upstream operators accept filters for.
    fn can_pushdown_filters(&self, probe_slots: &[SlotId]) -> HashSet<SlotId>;

    /// Deliver one derived filter for an accepted slot.
    fn add_runtime_filter(&self, slot_id: SlotId, filter: RuntimeInFilter);
}
