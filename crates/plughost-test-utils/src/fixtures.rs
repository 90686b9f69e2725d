// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WAT modules and manifests shared by sandbox and manager tests.

use plughost_core::{PluginManifest, ResourceHints};

/// `ping` hands back `"pong"` through `set_output`.
pub const ECHO_WAT: &str = r#"
(module
  (import "plughost" "set_output" (func $set_output (param i32 i32)))
  (import "plughost" "input_len" (func $input_len (result i32)))
  (import "plughost" "read_input" (func $read_input (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "pong")
  (func (export "ping")
    (call $set_output (i32.const 0) (i32.const 4)))
  (func (export "echo")
    (call $read_input (i32.const 1024))
    (call $set_output (i32.const 1024) (call $input_len)))
  (func (export "health") (result i32)
    (i32.const 0)))
"#;

/// Like [`ECHO_WAT`] but `ping` answers `"pong v2"`.
pub const ECHO_V2_WAT: &str = r#"
(module
  (import "plughost" "set_output" (func $set_output (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "pong v2")
  (func (export "ping")
    (call $set_output (i32.const 0) (i32.const 7))))
"#;

/// Arithmetic, traps and loops.
pub const MATH_WAT: &str = r#"
(module
  (import "plughost" "log" (func $log (param i32 i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "adding")
  (func (export "add") (param i32 i32) (result i32)
    (call $log (i32.const 2) (i32.const 0) (i32.const 6))
    (i32.add (local.get 0) (local.get 1)))
  (func (export "scale") (param i64 f64) (result i64 f64)
    (i64.mul (local.get 0) (i64.const 2))
    (f64.mul (local.get 1) (f64.const 0.5)))
  (func (export "boom")
    unreachable)
  (func (export "spin")
    (loop $forever (br $forever)))
  (func (export "grow") (param i32) (result i32)
    (memory.grow (local.get 0)))
  (func (export "unhealthy") (result i32)
    (i32.const 1)))
"#;

/// Declares a 2000-page (125 MiB) minimum memory.
pub const BIG_MEMORY_WAT: &str = r#"
(module
  (memory (export "memory") 2000)
  (func (export "run")))
"#;

/// Traps while the instance is being created.
pub const START_TRAP_WAT: &str = r#"
(module
  (func $start unreachable)
  (start $start)
  (func (export "run")))
"#;

/// Compiles a WAT fixture to a binary module.
pub fn wasm(wat: &str) -> Vec<u8> {
    match wat::parse_str(wat) {
        Ok(bytes) => bytes,
        Err(e) => panic!("fixture does not assemble: {e}"),
    }
}

/// Bytes that are not a WebAssembly binary.
pub fn corrupt_wasm() -> Vec<u8> {
    b"\0asm\x01\0\0\0garbage".to_vec()
}

/// A valid manifest exporting `exports`.
pub fn manifest(name: &str, version: &str, exports: &[&str]) -> PluginManifest {
    PluginManifest {
        name: name.to_string(),
        version: version.to_string(),
        description: format!("{name} test plugin"),
        author: "plughost tests".to_string(),
        exports: exports.iter().map(|e| e.to_string()).collect(),
        health_export: None,
        resources: ResourceHints::default(),
    }
}

/// Manifest for [`ECHO_WAT`].
pub fn echo_manifest() -> PluginManifest {
    manifest("echo", "1.0.0", &["ping", "echo"])
}
