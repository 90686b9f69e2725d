// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for plugin lifecycle, persistence, and sandbox operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::PluginId;

/// The error type returned by every plughost operation.
///
/// Each variant maps to a stable [`code`](PluginError::code) string that
/// transport layers use when building responses.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The manifest is missing fields or carries malformed values.
    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    /// A plugin with the same name, version and description is installed.
    #[error("plugin {name}@{version} already exists{}", existing.map(|id| format!(" as {id}")).unwrap_or_default())]
    AlreadyExists {
        name: String,
        version: String,
        existing: Option<PluginId>,
    },

    /// No plugin with the given id is known.
    #[error("plugin {0} not found")]
    NotFound(PluginId),

    /// The module bytes are not a valid WebAssembly binary.
    #[error("{}failed to compile module: {message}", prefix(plugin))]
    Compile {
        plugin: Option<PluginId>,
        message: String,
    },

    /// The module compiled but could not be linked or instantiated.
    #[error("{}failed to instantiate module: {message}", prefix(plugin))]
    Instantiate {
        plugin: Option<PluginId>,
        message: String,
    },

    /// The guest trapped (unreachable, out of bounds, out of fuel, ...).
    #[error("{}`{export}` trapped: {message}", prefix(plugin))]
    ExecutionTrap {
        plugin: Option<PluginId>,
        export: String,
        message: String,
    },

    /// The call exceeded its deadline or was cancelled.
    #[error("{}`{export}` timed out after {timeout:?}", prefix(plugin))]
    ExecutionTimeout {
        plugin: Option<PluginId>,
        export: String,
        timeout: Duration,
    },

    /// The plugin exists but is disabled.
    #[error("plugin {0} is disabled")]
    PluginDisabled(PluginId),

    /// The persistence backend failed.
    #[error("persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Writing or removing a bundle on disk failed.
    #[error("failed to write bundle {}: {source}", path.display())]
    BundleWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading a bundle from disk failed.
    #[error("failed to read bundle {}: {source}", path.display())]
    BundleRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A lifecycle operation conflicts with one already under way.
    #[error("plugin {id}: {message}")]
    ConcurrentConflict { id: PluginId, message: String },

    /// Call arguments do not match the export signature or the call ABI.
    #[error("invalid call arguments: {0}")]
    InvalidArguments(String),

    /// The sandbox instance was closed.
    #[error("sandbox instance is closed")]
    InstanceClosed,

    /// Some sub-steps of a multi-step operation failed.
    #[error("{operation} of plugin {id} partially failed: {}", join(errors))]
    Partial {
        id: PluginId,
        operation: &'static str,
        errors: Vec<PluginError>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

fn prefix(plugin: &Option<PluginId>) -> String {
    plugin.map(|id| format!("plugin {id}: ")).unwrap_or_default()
}

fn join(errors: &[PluginError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PluginError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ManifestInvalid(_) => "manifest_invalid",
            Self::AlreadyExists { .. } => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::Compile { .. } => "compile_error",
            Self::Instantiate { .. } => "instantiate_error",
            Self::ExecutionTrap { .. } => "execution_trap",
            Self::ExecutionTimeout { .. } => "execution_timeout",
            Self::PluginDisabled(_) => "plugin_disabled",
            Self::Persistence { .. } => "persistence_error",
            Self::BundleWrite { .. } => "bundle_write_error",
            Self::BundleRead { .. } => "bundle_read_error",
            Self::ConcurrentConflict { .. } => "concurrent_conflict",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::InstanceClosed => "instance_closed",
            Self::Partial { .. } => "partial_failure",
            Self::Internal(_) => "internal",
        }
    }

    /// Shorthand for a persistence error without an underlying source.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
            source: None,
        }
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile {
            plugin: None,
            message: message.into(),
        }
    }

    pub fn instantiate(message: impl Into<String>) -> Self {
        Self::Instantiate {
            plugin: None,
            message: message.into(),
        }
    }

    /// Attaches the plugin id to sandbox-level errors that do not carry one yet.
    pub fn with_plugin(mut self, id: PluginId) -> Self {
        match &mut self {
            Self::Compile { plugin, .. }
            | Self::Instantiate { plugin, .. }
            | Self::ExecutionTrap { plugin, .. }
            | Self::ExecutionTimeout { plugin, .. } => {
                plugin.get_or_insert(id);
            }
            _ => {}
        }
        self
    }

    /// True for failures raised by guest code rather than by the host.
    pub fn is_guest_failure(&self) -> bool {
        matches!(
            self,
            Self::ExecutionTrap { .. } | Self::ExecutionTimeout { .. }
        )
    }
}
