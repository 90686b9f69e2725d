// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A linked module ready to be called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::anyhow;
use async_trait::async_trait;
use plughost_core::{
    Arg, CallContext, CallOutput, PluginError, ResourceLimits, SandboxInstance, Value,
};
use tracing::debug;
use wasmtime::{Engine, InstancePre, Store, StoreLimitsBuilder, UpdateDeadline, Val, ValType};

use crate::host::CallState;

/// Why a call did not produce output.
enum CallFailure {
    Arguments(String),
    Interrupted,
    Trap(String),
}

/// A plugin instance backed by a pre-linked module.
///
/// Every call instantiates into a fresh store; nothing persists between calls.
pub struct WasmInstance {
    engine: Engine,
    pre: InstancePre<CallState>,
    limits: ResourceLimits,
    closed: AtomicBool,
}

impl WasmInstance {
    pub(crate) fn new(engine: Engine, pre: InstancePre<CallState>, limits: ResourceLimits) -> Self {
        Self {
            engine,
            pre,
            limits,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SandboxInstance for WasmInstance {
    async fn call(
        &self,
        export: &str,
        args: &[Arg],
        ctx: &CallContext,
    ) -> Result<CallOutput, PluginError> {
        if self.is_closed() {
            return Err(PluginError::InstanceClosed);
        }
        let timeout = || PluginError::ExecutionTimeout {
            plugin: None,
            export: export.to_string(),
            timeout: ctx.timeout,
        };
        if ctx.is_expired() {
            return Err(timeout());
        }

        let (params, input) = split_args(args)?;
        let engine = self.engine.clone();
        let pre = self.pre.clone();
        let limits = self.limits.clone();
        let name = export.to_string();
        let call_ctx = ctx.clone();

        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            run(&engine, &pre, &limits, &name, &params, input, &call_ctx)
        })
        .await
        .map_err(|e| PluginError::Internal(format!("sandbox call task failed: {e}")))?;
        debug!(
            export,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "sandbox call finished"
        );

        result.map_err(|failure| match failure {
            CallFailure::Arguments(message) => PluginError::InvalidArguments(message),
            CallFailure::Interrupted => timeout(),
            CallFailure::Trap(message) => PluginError::ExecutionTrap {
                plugin: None,
                export: export.to_string(),
                message,
            },
        })
    }

    fn close(&self) -> Result<(), PluginError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Separates primitive parameters from the single optional byte input.
fn split_args(args: &[Arg]) -> Result<(Vec<Val>, Vec<u8>), PluginError> {
    let mut params = Vec::with_capacity(args.len());
    let mut input: Option<Vec<u8>> = None;
    for arg in args {
        match arg {
            Arg::Value(value) => params.push(to_val(*value)),
            Arg::Bytes(bytes) => {
                if input.is_some() {
                    return Err(PluginError::InvalidArguments(
                        "at most one byte argument is supported".to_string(),
                    ));
                }
                input = Some(bytes.clone());
            }
        }
    }
    Ok((params, input.unwrap_or_default()))
}

fn to_val(value: Value) -> Val {
    match value {
        Value::I32(v) => Val::I32(v),
        Value::I64(v) => Val::I64(v),
        Value::F32(v) => Val::F32(v.to_bits()),
        Value::F64(v) => Val::F64(v.to_bits()),
    }
}

fn from_val(val: &Val) -> Option<Value> {
    match val {
        Val::I32(v) => Some(Value::I32(*v)),
        Val::I64(v) => Some(Value::I64(*v)),
        Val::F32(bits) => Some(Value::F32(f32::from_bits(*bits))),
        Val::F64(bits) => Some(Value::F64(f64::from_bits(*bits))),
        _ => None,
    }
}

fn zero_of(ty: &ValType) -> Option<Val> {
    match ty {
        ValType::I32 => Some(Val::I32(0)),
        ValType::I64 => Some(Val::I64(0)),
        ValType::F32 => Some(Val::F32(0)),
        ValType::F64 => Some(Val::F64(0)),
        _ => None,
    }
}

fn matches_type(val: &Val, ty: &ValType) -> bool {
    matches!(
        (val, ty),
        (Val::I32(_), ValType::I32)
            | (Val::I64(_), ValType::I64)
            | (Val::F32(_), ValType::F32)
            | (Val::F64(_), ValType::F64)
    )
}

fn describe(ty: &ValType) -> String {
    match ty {
        ValType::I32 => "i32".to_string(),
        ValType::I64 => "i64".to_string(),
        ValType::F32 => "f32".to_string(),
        ValType::F64 => "f64".to_string(),
        other => other.to_string(),
    }
}

/// Runs one call to completion on the current (blocking) thread.
fn run(
    engine: &Engine,
    pre: &InstancePre<CallState>,
    limits: &ResourceLimits,
    export: &str,
    params: &[Val],
    input: Vec<u8>,
    ctx: &CallContext,
) -> Result<CallOutput, CallFailure> {
    let store_limits = StoreLimitsBuilder::new()
        .memory_size(usize::try_from(limits.memory_bytes).unwrap_or(usize::MAX))
        .build();
    let mut store = Store::new(engine, CallState::new(input, store_limits));
    store.limiter(|state| &mut state.limits);
    store
        .set_fuel(limits.fuel.unwrap_or(u64::MAX))
        .map_err(|e| CallFailure::Trap(format!("cannot set fuel: {e}")))?;

    let deadline = ctx.deadline;
    let cancel = ctx.cancel.clone();
    store.set_epoch_deadline(1);
    store.epoch_deadline_callback(move |mut store_ctx| -> wasmtime::Result<UpdateDeadline> {
        if cancel.is_cancelled() || Instant::now() >= deadline {
            store_ctx.data_mut().interrupted = true;
            return Err(anyhow!("call interrupted: deadline exceeded or cancelled").into());
        }
        Ok(UpdateDeadline::Continue(1))
    });

    let instance = match pre.instantiate(&mut store) {
        Ok(instance) => instance,
        Err(e) => return Err(classify(&store, e)),
    };
    let func = instance
        .get_func(&mut store, export)
        .ok_or_else(|| {
            CallFailure::Arguments(format!("module has no exported function `{export}`"))
        })?;

    let ty = func.ty(&store);
    let expected: Vec<ValType> = ty.params().collect();
    if expected.len() != params.len()
        || !params.iter().zip(&expected).all(|(val, ty)| matches_type(val, ty))
    {
        return Err(CallFailure::Arguments(format!(
            "`{export}` expects ({}), got {} primitive argument(s)",
            expected.iter().map(describe).collect::<Vec<_>>().join(", "),
            params.len()
        )));
    }
    let mut results = ty
        .results()
        .map(|ty| zero_of(&ty))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            CallFailure::Arguments(format!("`{export}` returns a non-numeric value"))
        })?;

    if let Err(e) = func.call(&mut store, params, &mut results) {
        return Err(classify(&store, e));
    }

    let values = results.iter().filter_map(from_val).collect();
    Ok(CallOutput {
        values,
        output: store.into_data().output,
    })
}

fn classify(store: &Store<CallState>, error: impl std::fmt::Display) -> CallFailure {
    if store.data().interrupted {
        CallFailure::Interrupted
    } else {
        CallFailure::Trap(format!("{error:#}"))
    }
}
