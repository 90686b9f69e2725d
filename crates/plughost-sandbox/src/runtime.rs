// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine, module cache and epoch ticker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use plughost_core::{ModuleDigest, PluginError, ResourceLimits, SandboxInstance, SandboxRuntime};
use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, ExternType, Linker, Module, Store, StoreLimitsBuilder};

use crate::host::{self, CallState};
use crate::instance::WasmInstance;

const WASM_PAGE_SIZE: u64 = 64 * 1024;

/// Upper bound on running a module's start function during instantiation.
const INSTANTIATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime tuning.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Period of the epoch ticker. Bounds how late a timeout may fire.
    pub epoch_tick: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            epoch_tick: Duration::from_millis(10),
        }
    }
}

/// Number of epoch ticks covering `timeout`, at least one.
pub(crate) fn deadline_ticks(timeout: Duration, tick: Duration) -> u64 {
    let tick_ms = tick.as_millis().max(1);
    let timeout_ms = timeout.as_millis().max(1);
    u64::try_from(timeout_ms.div_ceil(tick_ms)).unwrap_or(u64::MAX)
}

/// Increments the engine epoch on a dedicated thread until dropped.
struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine, interval: Duration) -> Result<Self, PluginError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("plughost-epoch-ticker".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    engine.increment_epoch();
                }
            })
            .map_err(|e| PluginError::Internal(format!("cannot start epoch ticker: {e}")))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A compiled module and the number of pins holding it in the cache.
struct CachedModule {
    module: Module,
    pins: usize,
}

/// The production [`SandboxRuntime`].
pub struct WasmRuntime {
    engine: Engine,
    linker: Linker<CallState>,
    modules: DashMap<ModuleDigest, CachedModule>,
    epoch_tick: Duration,
    _ticker: EpochTicker,
}

impl WasmRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self, PluginError> {
        let mut wasm_config = Config::new();
        wasm_config.consume_fuel(true);
        wasm_config.epoch_interruption(true);

        let engine = Engine::new(&wasm_config)
            .map_err(|e| PluginError::Internal(format!("failed to create wasmtime engine: {e}")))?;

        let mut linker = Linker::new(&engine);
        host::define(&mut linker)?;

        let ticker = EpochTicker::start(engine.clone(), config.epoch_tick)?;
        info!(epoch_tick_ms = config.epoch_tick.as_millis() as u64, "wasm runtime initialized");

        Ok(Self {
            engine,
            linker,
            modules: DashMap::new(),
            epoch_tick: config.epoch_tick,
            _ticker: ticker,
        })
    }

    /// Number of modules in the compile cache.
    pub fn cached_modules(&self) -> usize {
        self.modules.len()
    }

    /// Outstanding pins on `digest`.
    pub fn pins(&self, digest: &ModuleDigest) -> usize {
        self.modules.get(digest).map(|entry| entry.pins).unwrap_or(0)
    }

    fn check_exports(module: &Module, required: &[String]) -> Result<(), PluginError> {
        for name in required {
            match module.get_export(name) {
                Some(ExternType::Func(_)) => {}
                Some(_) => {
                    return Err(PluginError::instantiate(format!(
                        "export `{name}` is not a function"
                    )));
                }
                None => {
                    return Err(PluginError::instantiate(format!(
                        "module does not export `{name}`"
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_memory(module: &Module, limits: &ResourceLimits) -> Result<(), PluginError> {
        for export in module.exports() {
            if let ExternType::Memory(memory) = export.ty() {
                let minimum = memory.minimum().saturating_mul(WASM_PAGE_SIZE);
                if minimum > limits.memory_bytes {
                    return Err(PluginError::instantiate(format!(
                        "memory `{}` needs at least {minimum} bytes, limit is {}",
                        export.name(),
                        limits.memory_bytes
                    )));
                }
            }
        }
        Ok(())
    }

    /// Instantiates once in a throwaway store so link errors and start-function
    /// traps surface now instead of on the first call.
    fn probe(
        &self,
        pre: &wasmtime::InstancePre<CallState>,
        limits: &ResourceLimits,
    ) -> Result<(), PluginError> {
        let store_limits = StoreLimitsBuilder::new()
            .memory_size(usize::try_from(limits.memory_bytes).unwrap_or(usize::MAX))
            .build();
        let mut store = Store::new(&self.engine, CallState::new(Vec::new(), store_limits));
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(limits.fuel.unwrap_or(u64::MAX))
            .map_err(|e| PluginError::instantiate(format!("cannot set fuel: {e}")))?;
        store.epoch_deadline_trap();
        store.set_epoch_deadline(deadline_ticks(INSTANTIATE_TIMEOUT, self.epoch_tick));
        pre.instantiate(&mut store)
            .map(|_| ())
            .map_err(|e| PluginError::instantiate(format!("{e:#}")))
    }
}

impl SandboxRuntime for WasmRuntime {
    fn compile(&self, wasm: &[u8]) -> Result<ModuleDigest, PluginError> {
        let digest = ModuleDigest::of(wasm);
        if let Some(mut cached) = self.modules.get_mut(&digest) {
            cached.pins += 1;
            debug!(%digest, pins = cached.pins, "module cache hit");
            return Ok(digest);
        }

        // Compiled outside the shard lock; a racing compile of the same bytes
        // keeps whichever module landed first.
        let module = Module::from_binary(&self.engine, wasm)
            .map_err(|e| PluginError::compile(format!("{e:#}")))?;
        match self.modules.entry(digest.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().pins += 1,
            Entry::Vacant(entry) => {
                entry.insert(CachedModule { module, pins: 1 });
                debug!(%digest, bytes = wasm.len(), "module compiled");
            }
        }
        Ok(digest)
    }

    fn instantiate(
        &self,
        digest: &ModuleDigest,
        limits: &ResourceLimits,
        required_exports: &[String],
    ) -> Result<Arc<dyn SandboxInstance>, PluginError> {
        let module = self
            .modules
            .get(digest)
            .map(|entry| entry.module.clone())
            .ok_or_else(|| PluginError::instantiate(format!("module {digest} is not compiled")))?;

        Self::check_exports(&module, required_exports)?;
        Self::check_memory(&module, limits)?;

        let pre = self
            .linker
            .instantiate_pre(&module)
            .map_err(|e| PluginError::instantiate(format!("{e:#}")))?;
        self.probe(&pre, limits)?;

        Ok(Arc::new(WasmInstance::new(
            self.engine.clone(),
            pre,
            limits.clone(),
        )))
    }

    fn release(&self, digest: &ModuleDigest) {
        match self.modules.entry(digest.clone()) {
            Entry::Occupied(mut entry) => {
                let cached = entry.get_mut();
                cached.pins = cached.pins.saturating_sub(1);
                if cached.pins == 0 {
                    entry.remove();
                    debug!(%digest, "module evicted");
                }
            }
            Entry::Vacant(_) => warn!(%digest, "releasing a module that is not cached"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plughost_test_utils::fixtures::{self, wasm};

    fn runtime() -> WasmRuntime {
        WasmRuntime::new(RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn deadline_ticks_round_up() {
        let tick = Duration::from_millis(10);
        assert_eq!(deadline_ticks(Duration::from_millis(200), tick), 20);
        assert_eq!(deadline_ticks(Duration::from_millis(201), tick), 21);
        assert_eq!(deadline_ticks(Duration::ZERO, tick), 1);
    }

    #[test]
    fn compile_rejects_garbage() {
        let err = runtime().compile(&fixtures::corrupt_wasm()).unwrap_err();
        assert_eq!(err.code(), "compile_error");
    }

    #[test]
    fn compile_rejects_text_format() {
        let err = runtime().compile(fixtures::ECHO_WAT.as_bytes()).unwrap_err();
        assert!(matches!(err, PluginError::Compile { .. }));
    }

    #[test]
    fn compile_caches_by_digest_until_every_pin_is_released() {
        let runtime = runtime();
        let bytes = wasm(fixtures::ECHO_WAT);
        let first = runtime.compile(&bytes).unwrap();
        let second = runtime.compile(&bytes).unwrap();
        assert_eq!(first, second);
        assert_eq!(runtime.cached_modules(), 1);
        assert_eq!(runtime.pins(&first), 2);

        runtime.release(&first);
        assert_eq!(runtime.cached_modules(), 1);
        assert!(runtime
            .instantiate(&second, &ResourceLimits::default(), &["ping".to_string()])
            .is_ok());

        runtime.release(&second);
        assert_eq!(runtime.cached_modules(), 0);
        assert!(runtime
            .instantiate(&first, &ResourceLimits::default(), &[])
            .is_err());
    }

    #[test]
    fn instantiate_checks_required_exports() {
        let runtime = runtime();
        let digest = runtime.compile(&wasm(fixtures::ECHO_WAT)).unwrap();
        let limits = ResourceLimits::default();

        assert!(runtime
            .instantiate(&digest, &limits, &["ping".to_string()])
            .is_ok());
        let err = runtime
            .instantiate(&digest, &limits, &["missing".to_string()])
            .err()
            .unwrap();
        assert!(err.to_string().contains("does not export `missing`"));
        let err = runtime
            .instantiate(&digest, &limits, &["memory".to_string()])
            .err()
            .unwrap();
        assert!(err.to_string().contains("not a function"));
    }

    #[test]
    fn instantiate_rejects_memory_over_limit() {
        let runtime = runtime();
        let digest = runtime.compile(&wasm(fixtures::BIG_MEMORY_WAT)).unwrap();
        let err = runtime
            .instantiate(&digest, &ResourceLimits::default(), &[])
            .err()
            .unwrap();
        assert_eq!(err.code(), "instantiate_error");
    }

    #[test]
    fn instantiate_surfaces_start_trap() {
        let runtime = runtime();
        let digest = runtime.compile(&wasm(fixtures::START_TRAP_WAT)).unwrap();
        assert!(matches!(
            runtime.instantiate(&digest, &ResourceLimits::default(), &[]),
            Err(PluginError::Instantiate { .. })
        ));
    }

    #[test]
    fn instantiate_rejects_unknown_imports() {
        let runtime = runtime();
        let module = wasm(r#"(module (import "env" "nope" (func)) (func (export "run")))"#);
        let digest = runtime.compile(&module).unwrap();
        assert!(matches!(
            runtime.instantiate(&digest, &ResourceLimits::default(), &[]),
            Err(PluginError::Instantiate { .. })
        ));
    }
}
