// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test utilities for replicator, integration and chaos tests.
//!
//! This module provides:
//! - Redis testcontainer setup
//! - In-memory source, index, resolver and checkpoint doubles
//! - Change event helpers

#![allow(dead_code)]

pub mod containers;
pub mod mocks;

pub use containers::*;
pub use mocks::*;
