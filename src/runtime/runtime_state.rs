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
use std::sync::{Arc, Mutex};

use crate::runtime::mem_tracker::MemTracker;

/// Default number of rows per output chunk when the query does not override it.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Per-driver execution context.
///
/// Provides access to frequently used query options (chunk size), the driver's memory
/// tracker, and the shared error slot that aborts sibling drivers of the same fragment.
#[derive(Debug)]
pub struct RuntimeState {
    chunk_size: usize,
    mem_tracker: Option<Arc<MemTracker>>,
    error_state: Arc<RuntimeErrorState>,
}

#[derive(Debug, Default)]
pub struct RuntimeErrorState {
    error: Mutex<Option<String>>,
}

impl RuntimeErrorState {
    pub fn set_error(&self, err: String) {
        let mut guard = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            mem_tracker: None,
            error_state: Arc::new(RuntimeErrorState::default()),
        }
    }
}

impl Clone for RuntimeState {
    fn clone(&self) -> Self {
        Self {
            chunk_size: self.chunk_size,
            mem_tracker: self.mem_tracker.clone(),
            error_state: Arc::clone(&self.error_state),
        }
    }
}

impl RuntimeState {
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ..Self::default()
        }
    }

    /// Preferred number of rows per output chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.mem_tracker = Some(tracker);
    }

    pub fn mem_tracker(&self) -> Option<&Arc<MemTracker>> {
        self.mem_tracker.as_ref()
    }

    pub fn error_state(&self) -> &Arc<RuntimeErrorState> {
        &self.error_state
    }
}
