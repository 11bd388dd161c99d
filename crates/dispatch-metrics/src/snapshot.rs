// Copyright 2026 Dispatch Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Call statistics for one named operation (e.g. `dispatch_internal`, `search`)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OperationMetrics {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_us: u64,
    pub p50_latency_us: u64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
}

/// How often a group was picked and turned down
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMetrics {
    pub selected: u64,
    pub rejected: u64,
}

/// Ping outcomes for one node
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeMetrics {
    pub pings: u64,
    pub ping_failures: u64,
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub uptime_ms: u64,
    /// Queries that ran out of groups to try
    pub no_suitable_groups: u64,
    pub operations: HashMap<String, OperationMetrics>,
    pub groups: BTreeMap<u32, GroupMetrics>,
    pub nodes: BTreeMap<u32, NodeMetrics>,
}

impl MetricsSnapshot {
    pub fn operation(&self, name: &str) -> Option<&OperationMetrics> {
        self.operations.get(name)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
