// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host functions exposed to guests under the `plughost` import module.

use anyhow::anyhow;
use plughost_core::PluginError;
use tracing::{debug, error, info, trace, warn};
use wasmtime::{Caller, Extern, Linker, Memory, StoreLimits};

pub(crate) const IMPORT_MODULE: &str = "plughost";

/// Largest output a guest may hand back in one call.
const MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

/// Longest guest log line forwarded to tracing.
const MAX_LOG_BYTES: usize = 4096;

/// Per-call store data.
pub(crate) struct CallState {
    pub input: Vec<u8>,
    pub output: Option<Vec<u8>>,
    pub limits: StoreLimits,
    /// Set by the epoch callback when it aborts the call.
    pub interrupted: bool,
}

impl CallState {
    pub fn new(input: Vec<u8>, limits: StoreLimits) -> Self {
        Self {
            input,
            output: None,
            limits,
            interrupted: false,
        }
    }
}

/// Registers every host function on `linker`.
pub(crate) fn define(linker: &mut Linker<CallState>) -> Result<(), PluginError> {
    linker
        .func_wrap(IMPORT_MODULE, "input_len", |caller: Caller<'_, CallState>| -> i32 {
            i32::try_from(caller.data().input.len()).unwrap_or(i32::MAX)
        })
        .map_err(link_error)?;

    linker
        .func_wrap(
            IMPORT_MODULE,
            "read_input",
            |mut caller: Caller<'_, CallState>, ptr: i32| -> Result<(), wasmtime::Error> {
                let memory = guest_memory(&mut caller)?;
                let input = std::mem::take(&mut caller.data_mut().input);
                let written = write_bytes(&memory, &mut caller, ptr, &input);
                caller.data_mut().input = input;
                if !written {
                    return Err(anyhow!("read_input: destination {ptr} is out of bounds").into());
                }
                Ok(())
            },
        )
        .map_err(link_error)?;

    linker
        .func_wrap(
            IMPORT_MODULE,
            "set_output",
            |mut caller: Caller<'_, CallState>,
             ptr: i32,
             len: i32|
             -> Result<(), wasmtime::Error> {
                if usize::try_from(len).is_ok_and(|len| len > MAX_OUTPUT_BYTES) {
                    let message = format!("set_output: {len} bytes exceeds {MAX_OUTPUT_BYTES}");
                    return Err(anyhow!(message).into());
                }
                let memory = guest_memory(&mut caller)?;
                let bytes = read_bytes(&memory, &caller, ptr, len)
                    .ok_or_else(|| anyhow!("set_output: range {ptr}+{len} is out of bounds"))?;
                caller.data_mut().output = Some(bytes);
                Ok(())
            },
        )
        .map_err(link_error)?;

    linker
        .func_wrap(
            IMPORT_MODULE,
            "log",
            |mut caller: Caller<'_, CallState>, level: i32, ptr: i32, len: i32| {
                let Ok(memory) = guest_memory(&mut caller) else {
                    return;
                };
                let len = len.clamp(0, MAX_LOG_BYTES as i32);
                let Some(bytes) = read_bytes(&memory, &caller, ptr, len) else {
                    return;
                };
                let message = String::from_utf8_lossy(&bytes);
                match level {
                    0 => trace!(guest = %message, "plugin log"),
                    1 => debug!(guest = %message, "plugin log"),
                    2 => info!(guest = %message, "plugin log"),
                    3 => warn!(guest = %message, "plugin log"),
                    _ => error!(guest = %message, "plugin log"),
                }
            },
        )
        .map_err(link_error)?;

    Ok(())
}

fn link_error(e: impl std::fmt::Display) -> PluginError {
    PluginError::Internal(format!("failed to define host function: {e}"))
}

fn guest_memory(caller: &mut Caller<'_, CallState>) -> Result<Memory, wasmtime::Error> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => Err(anyhow!("module does not export `memory`").into()),
    }
}

fn guest_range(ptr: i32, len: usize) -> Option<std::ops::Range<usize>> {
    let start = usize::try_from(ptr).ok()?;
    Some(start..start.checked_add(len)?)
}

/// Copies `len` bytes at `ptr` out of guest memory.
fn read_bytes(
    memory: &Memory,
    caller: &Caller<'_, CallState>,
    ptr: i32,
    len: i32,
) -> Option<Vec<u8>> {
    let range = guest_range(ptr, usize::try_from(len).ok()?)?;
    memory.data(caller).get(range).map(<[u8]>::to_vec)
}

/// Copies `bytes` into guest memory at `ptr`. False when out of bounds.
fn write_bytes(
    memory: &Memory,
    caller: &mut Caller<'_, CallState>,
    ptr: i32,
    bytes: &[u8],
) -> bool {
    let Some(range) = guest_range(ptr, bytes.len()) else {
        return false;
    };
    match memory.data_mut(caller).get_mut(range) {
        Some(dst) => {
            dst.copy_from_slice(bytes);
            true
        }
        None => false,
    }
}
