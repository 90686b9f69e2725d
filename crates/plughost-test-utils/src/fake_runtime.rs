// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A sandbox runtime that never executes wasm.
//!
//! Calls sleep for a configurable delay and answer `"{export}:{generation}"`
//! (or echo their byte argument), which lets tests observe concurrency,
//! deadlines and instance swaps without compiling modules.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use plughost_core::{
    Arg, CallContext, CallOutput, ModuleDigest, PluginError, ResourceLimits, SandboxInstance,
    SandboxRuntime,
};

/// Prefix that makes [`FakeRuntime::compile`] fail.
pub const FAIL_COMPILE: &[u8] = b"fail-compile";

/// Counters shared by a runtime and all of its instances.
#[derive(Debug, Default)]
pub struct FakeStats {
    pub calls: AtomicUsize,
    pub current: AtomicUsize,
    pub max_concurrent: AtomicUsize,
    pub instances: AtomicUsize,
    pub closed: AtomicUsize,
    pub evicted: AtomicUsize,
}

impl FakeStats {
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Holds `instantiate` calls until opened.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    /// Lets every held and future caller through.
    pub fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.opened.notify_all();
    }

    /// Number of callers currently held.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn pass(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self
                .opened
                .wait(open)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Settings {
    delay: Duration,
    trap_exports: HashSet<String>,
    fail_instantiate: bool,
    instantiate_gate: Option<Arc<Gate>>,
}

/// Fake [`SandboxRuntime`].
#[derive(Default)]
pub struct FakeRuntime {
    settings: Arc<Mutex<Settings>>,
    /// Pin count per cached digest.
    compiled: Mutex<HashMap<ModuleDigest, usize>>,
    stats: Arc<FakeStats>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = delay;
        self
    }

    /// Calls to `export` fail with an execution trap.
    pub fn trap_on(&self, export: &str) {
        self.lock().trap_exports.insert(export.to_string());
    }

    /// Makes every later `instantiate` fail until reset.
    pub fn set_fail_instantiate(&self, fail: bool) {
        self.lock().fail_instantiate = fail;
    }

    /// Holds every later `instantiate` at its start until the returned gate
    /// is opened.
    pub fn hold_instantiate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.lock().instantiate_gate = Some(gate.clone());
        gate
    }

    pub fn stats(&self) -> Arc<FakeStats> {
        self.stats.clone()
    }

    pub fn is_cached(&self, digest: &ModuleDigest) -> bool {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(digest)
    }

    /// Outstanding pins on `digest`.
    pub fn pins(&self, digest: &ModuleDigest) -> usize {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(digest)
            .copied()
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SandboxRuntime for FakeRuntime {
    fn compile(&self, wasm: &[u8]) -> Result<ModuleDigest, PluginError> {
        if wasm.starts_with(FAIL_COMPILE) {
            return Err(PluginError::compile("fake module rejected"));
        }
        let digest = ModuleDigest::of(wasm);
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(digest.clone())
            .and_modify(|pins| *pins += 1)
            .or_insert(1);
        Ok(digest)
    }

    fn instantiate(
        &self,
        digest: &ModuleDigest,
        _limits: &ResourceLimits,
        _required_exports: &[String],
    ) -> Result<Arc<dyn SandboxInstance>, PluginError> {
        let (gate, fail) = {
            let settings = self.lock();
            (settings.instantiate_gate.clone(), settings.fail_instantiate)
        };
        if let Some(gate) = gate {
            gate.pass();
        }
        if fail {
            return Err(PluginError::instantiate("fake instantiation failure"));
        }
        if !self.is_cached(digest) {
            return Err(PluginError::instantiate(format!("module {digest} is not compiled")));
        }
        let generation = self.stats.instances.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(FakeInstance {
            generation,
            settings: self.settings.clone(),
            stats: self.stats.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn release(&self, digest: &ModuleDigest) {
        let mut compiled = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pins) = compiled.get_mut(digest) else {
            return;
        };
        *pins -= 1;
        if *pins == 0 {
            compiled.remove(digest);
            self.stats.evicted.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct FakeInstance {
    generation: usize,
    settings: Arc<Mutex<Settings>>,
    stats: Arc<FakeStats>,
    closed: AtomicBool,
}

/// Decrements the current-call gauge when a call ends, however it ends.
struct Running<'a>(&'a FakeStats);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SandboxInstance for FakeInstance {
    async fn call(
        &self,
        export: &str,
        args: &[Arg],
        ctx: &CallContext,
    ) -> Result<CallOutput, PluginError> {
        if self.is_closed() {
            return Err(PluginError::InstanceClosed);
        }
        let (delay, trap) = {
            let settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
            (settings.delay, settings.trap_exports.contains(export))
        };

        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_concurrent.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.stats);

        let timed_out = tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = tokio::time::sleep_until(ctx.deadline.into()) => true,
            _ = ctx.cancel.cancelled() => true,
        };
        if timed_out {
            return Err(PluginError::ExecutionTimeout {
                plugin: None,
                export: export.to_string(),
                timeout: ctx.timeout,
            });
        }
        if trap {
            return Err(PluginError::ExecutionTrap {
                plugin: None,
                export: export.to_string(),
                message: "unreachable".to_string(),
            });
        }

        let output = args
            .iter()
            .find_map(|arg| match arg {
                Arg::Bytes(bytes) => Some(bytes.clone()),
                Arg::Value(_) => None,
            })
            .unwrap_or_else(|| format!("{export}:{}", self.generation).into_bytes());
        Ok(CallOutput {
            values: Vec::new(),
            output: Some(output),
        })
    }

    fn close(&self) -> Result<(), PluginError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
