// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! wasmtime-backed sandbox for plugin modules.
//!
//! One [`Engine`](wasmtime::Engine) is shared by every plugin. Modules are
//! compiled once and cached by digest. Each call runs in a fresh
//! [`Store`](wasmtime::Store) with its own linear memory, fuel and epoch
//! deadline, so a trap or an interrupted call leaves nothing behind for the
//! next one.
//!
//! Guests talk to the host through the `plughost` import module:
//!
//! | import                          | purpose                               |
//! |---------------------------------|---------------------------------------|
//! | `input_len() -> i32`            | length of the call's byte argument    |
//! | `read_input(ptr: i32)`          | copy the byte argument to guest memory|
//! | `set_output(ptr: i32, len: i32)`| hand result bytes back to the host    |
//! | `log(level: i32, ptr, len)`     | forward a message to `tracing`        |

mod host;
mod instance;
mod runtime;

pub use instance::WasmInstance;
pub use runtime::{RuntimeConfig, WasmRuntime};
