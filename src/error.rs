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

//! Error types
//!
//! Only recoverable, caller-facing failures live here. Accounting and
//! lifecycle invariant violations (negative cost, load-count underflow,
//! double finalize, wrong finalize thread) panic instead.

use crate::resources::{HandleId, ResourceKind};
use std::fmt;

/// Resource cache error type
#[derive(Debug, Clone, PartialEq)]
pub enum CacheError {
    /// No handle with this identity is registered
    HandleNotFound(HandleId),

    /// A resource or handle of the wrong kind was supplied
    TypeMismatch {
        expected: ResourceKind,
        found: ResourceKind,
    },

    /// Evicting every removable resource would still not fit the new one
    EvictionExhausted {
        requested: u64,
        current_cost: u64,
        max_cost: u64,
    },

    /// Child handles are removed through their parent only
    ChildRemoval(HandleId),

    /// Child already attached to this parent
    DuplicateChild(HandleId),

    /// Handle is not in a state that allows the requested transition
    InvalidState(String),

    /// No loader registered for this kind
    NoLoader(ResourceKind),

    /// Loader reported a failure
    LoadError(String),

    /// Operation requires that no loads are in flight
    LoadInProgress(usize),

    /// Multi-file construction is only supported for shader programs
    UnsupportedMultiPath(ResourceKind),

    /// Serialization error
    SerializationError(String),

    /// Deserialization error
    DeserializationError(String),

    /// Invalid configuration value
    ConfigError(String),

    /// IO error (file operations, etc.)
    IoError(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::HandleNotFound(id) => write!(f, "Resource handle not found: {id}"),
            CacheError::TypeMismatch { expected, found } => {
                write!(f, "Resource type mismatch: expected {expected}, found {found}")
            }
            CacheError::EvictionExhausted {
                requested,
                current_cost,
                max_cost,
            } => write!(
                f,
                "Could not evict enough resources to fit cost {requested} (current {current_cost}, max {max_cost})"
            ),
            CacheError::ChildRemoval(id) => {
                write!(f, "Child resource {id} can only be removed with its parent")
            }
            CacheError::DuplicateChild(id) => write!(f, "Child {id} already added to resource"),
            CacheError::InvalidState(msg) => write!(f, "Invalid handle state: {msg}"),
            CacheError::NoLoader(kind) => write!(f, "No loader registered for {kind}"),
            CacheError::LoadError(msg) => write!(f, "Resource load error: {msg}"),
            CacheError::LoadInProgress(count) => {
                write!(f, "{count} resource load(s) still in progress")
            }
            CacheError::UnsupportedMultiPath(kind) => {
                write!(f, "Multiple-file construction is not supported for {kind}")
            }
            CacheError::SerializationError(msg) => write!(f, "Serialization error: {msg}"),
            CacheError::DeserializationError(msg) => write!(f, "Deserialization error: {msg}"),
            CacheError::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
            CacheError::IoError(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        match err.classify() {
            serde_json::error::Category::Io => CacheError::IoError(err.to_string()),
            _ => CacheError::DeserializationError(err.to_string()),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CacheError>;
