// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered compensations for multi-step operations.
//!
//! Each completed step registers a compensation. If a later step fails the
//! compensations run newest first. Rollback is best-effort: a failing
//! compensation is logged and the remaining ones still run.

use std::future::Future;

use futures::future::BoxFuture;
use plughost_core::PluginError;
use tracing::{debug, warn};

pub struct Saga {
    operation: &'static str,
    compensations: Vec<(&'static str, BoxFuture<'static, Result<(), PluginError>>)>,
}

impl Saga {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            compensations: Vec::new(),
        }
    }

    /// Registers the undo of a step that just succeeded. The future does not
    /// run unless [`rollback`](Self::rollback) is called.
    pub fn on_rollback<F>(&mut self, step: &'static str, compensation: F)
    where
        F: Future<Output = Result<(), PluginError>> + Send + 'static,
    {
        self.compensations.push((step, Box::pin(compensation)));
    }

    /// Number of registered compensations.
    pub(crate) fn len(&self) -> usize {
        self.compensations.len()
    }

    /// Discards every compensation.
    pub fn commit(self) {
        debug!(operation = self.operation, steps = self.len(), "saga committed");
    }

    /// Runs the compensations LIFO. Returns how many failed.
    pub async fn rollback(mut self) -> usize {
        let mut failed = 0;
        while let Some((step, compensation)) = self.compensations.pop() {
            match compensation.await {
                Ok(()) => debug!(operation = self.operation, step, "compensation applied"),
                Err(e) => {
                    failed += 1;
                    warn!(operation = self.operation, step, error = %e, "compensation failed");
                }
            }
        }
        failed
    }
}
