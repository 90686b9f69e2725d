// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plughost - a WebAssembly plugin host.
//!
//! This is the binary entry point: `serve` runs the host until interrupted,
//! the other subcommands perform one lifecycle operation and exit.

mod commands;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use plughost_core::{Arg, PluginId};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Plughost - a WebAssembly plugin host.
#[derive(Parser, Debug)]
#[command(name = "plughost", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Load persisted plugins and run until Ctrl-C.
    Serve,
    /// Install a plugin from a manifest and a compiled module.
    Install {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long)]
        wasm: PathBuf,
    },
    /// List installed plugins.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Call an exported function.
    Invoke {
        id: i64,
        export: String,
        /// Bytes handed to the plugin as its input buffer.
        #[arg(long)]
        input: Option<String>,
        /// Primitive argument as `type:value`, e.g. `i32:7`. Repeatable.
        #[arg(long = "arg", value_parser = commands::parse_arg)]
        args: Vec<Arg>,
        /// Per-call timeout overriding `plugins.timeout_secs`.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Accept calls for a plugin again.
    Enable { id: i64 },
    /// Reject calls for a plugin without unloading it.
    Disable { id: i64 },
    /// Recompile a plugin from its bundle and swap it in.
    Reload { id: i64 },
    /// Remove a plugin, its bundle and its database row.
    Uninstall { id: i64 },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => plughost_config::load_and_validate_path(path),
        None => plughost_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            plughost_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    serve::init_tracing(&config.log.level, config.log.json);

    let result = match cli.command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Install { manifest, wasm } => {
            commands::run_install(&config, &manifest, &wasm).await
        }
        Commands::List { json } => commands::run_list(&config, json).await,
        Commands::Invoke {
            id,
            export,
            input,
            mut args,
            timeout_ms,
        } => {
            if let Some(input) = input {
                args.push(Arg::Bytes(input.into_bytes()));
            }
            commands::run_invoke(&config, PluginId(id), &export, &args, timeout_ms).await
        }
        Commands::Enable { id } => commands::run_enable(&config, PluginId(id)).await,
        Commands::Disable { id } => commands::run_disable(&config, PluginId(id)).await,
        Commands::Reload { id } => commands::run_reload(&config, PluginId(id)).await,
        Commands::Uninstall { id } => commands::run_uninstall(&config, PluginId(id)).await,
    };

    if let Err(e) = result {
        eprintln!("plughost: error [{}]: {e}", e.code());
        std::process::exit(1);
    }
}
