// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sandbox seam: compiling modules and calling into isolated instances.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PluginError;
use crate::types::{Arg, CallContext, CallOutput, ModuleDigest, ResourceLimits};

/// Compiles modules and creates isolated instances from them.
///
/// Compilation is CPU-bound and synchronous; callers run it on a blocking
/// thread.
pub trait SandboxRuntime: Send + Sync {
    /// Validates and compiles `wasm`, caching the result by digest.
    ///
    /// Every successful call pins the cached module once. Each pin must be
    /// given back with [`release`](SandboxRuntime::release).
    fn compile(&self, wasm: &[u8]) -> Result<ModuleDigest, PluginError>;

    /// Links a compiled module and checks it provides `required_exports`.
    fn instantiate(
        &self,
        digest: &ModuleDigest,
        limits: &ResourceLimits,
        required_exports: &[String],
    ) -> Result<Arc<dyn SandboxInstance>, PluginError>;

    /// Gives back one pin taken by `compile`. The module leaves the cache
    /// when its last pin is released. No-op for unknown digests.
    fn release(&self, digest: &ModuleDigest);
}

/// A live, callable plugin instance.
#[async_trait]
pub trait SandboxInstance: Send + Sync {
    /// Calls `export` with `args`, honouring the context's deadline and
    /// cancellation.
    async fn call(
        &self,
        export: &str,
        args: &[Arg],
        ctx: &CallContext,
    ) -> Result<CallOutput, PluginError>;

    /// Releases the instance. Idempotent; later calls fail with
    /// [`PluginError::InstanceClosed`].
    fn close(&self) -> Result<(), PluginError>;

    fn is_closed(&self) -> bool;
}
