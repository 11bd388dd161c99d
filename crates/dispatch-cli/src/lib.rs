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


//! # Dispatch CLI
//!
//! Command-line front end for the search dispatch core.
//!
//! The `dispatch` binary loads a cluster description from a JSON file, builds a
//! [`Dispatcher`](dispatch_core::Dispatcher) against it and either runs one
//! query or reports the state of the cluster:
//!
//! - `dispatch query`: search, then fill summaries, printing the result as JSON
//! - `dispatch status`: node and group health after the first ping sweep
//!
//! The query path lives in [`query`] so it can be driven without the binary.

pub mod query;
