// Copyright 2024 Saptak Santra
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

//! Resource Cache - cost-bounded asset cache for a game-engine editor
//!
//! Owns every loadable engine asset behind stable shared handles, keeps the
//! resident set under a cost budget with LRU eviction, loads on a worker pool
//! and constructs device objects on a single finalize thread.

pub mod config;
pub mod error;
pub mod prelude;
pub mod profiling;
pub mod resources;

pub use config::CacheConfig;
pub use error::*;
pub use resources::*;
