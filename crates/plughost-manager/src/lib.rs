// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin lifecycle management.
//!
//! [`PluginManager`] owns the in-memory handle table and coordinates the
//! bundle registry, the persistence store and the sandbox runtime. Lifecycle
//! operations on one plugin are serialized; different plugins proceed in
//! parallel and invocations never wait on a lifecycle lock.

mod autoload;
pub mod config;
mod handle;
pub mod health;
mod manager;
pub mod saga;
mod watcher;

pub use autoload::AutoloadReport;
pub use config::{HealthSettings, ManagerConfig, WatchSettings};
pub use health::{HealthMonitor, HealthTracker};
pub use manager::PluginManager;
pub use plughost_metrics::MetricsSnapshot;
pub use saga::Saga;
pub use watcher::BundleWatcher;
