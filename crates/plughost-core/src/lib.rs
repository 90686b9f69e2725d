// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core types, errors, and seam traits shared by every plughost crate.
//!
//! The manager talks to persistence and to the sandbox only through the
//! [`PluginStore`], [`SandboxRuntime`] and [`SandboxInstance`] traits defined
//! here, so tests can swap in in-memory fakes.

pub mod error;
pub mod traits;
pub mod types;

pub use error::PluginError;
pub use traits::sandbox::{SandboxInstance, SandboxRuntime};
pub use traits::store::PluginStore;
pub use types::*;
