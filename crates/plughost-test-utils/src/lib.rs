// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test support for plughost.
//!
//! - [`MemoryPluginStore`]: in-memory [`PluginStore`](plughost_core::PluginStore)
//!   with one-shot failure injection
//! - [`FakeRuntime`]: sandbox runtime that records concurrency and never runs wasm
//! - [`fixtures`]: small WAT modules and manifests

pub mod fake_runtime;
pub mod fixtures;
pub mod memory_store;

pub use fake_runtime::{FakeRuntime, FakeStats, Gate};
pub use memory_store::{MemoryPluginStore, StoreOp};
