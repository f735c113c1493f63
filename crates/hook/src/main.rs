// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! CLI for checking a runtime module before hooking it
//!
//! Resolves every runtime entry point the hooks need, plus the host update
//! routine, and reports what is missing.
//!
//! # Usage
//!
//! ```bash
//! hook-probe ./liblua.so
//! hook-probe ./game_binary --update-symbol _ZN11Application6updateEv
//! hook-probe ./liblua.so --config hook.toml
//! ```

use std::{path::PathBuf, process};

use clap::Parser;
use hook::{HookConfig, LoadedModule, LuaApi, SymbolSource, SymbolTable};

#[derive(Parser, Debug)]
#[command(name = "hook-probe", about = "Check that a module exports what the Lua hooks need")]
struct Args {
    /// Shared module to inspect
    module: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mangled name of the host update routine (overrides the configuration)
    #[arg(long)]
    update_symbol: Option<String>,
}

fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HookConfig::load(path).unwrap_or_else(|e| {
            eprintln!("{e}");
            process::exit(2);
        }),
        None => HookConfig::default(),
    };
    if let Some(symbol) = args.update_symbol {
        config.update_symbol = symbol;
    }

    hook::logging::init(&config.log_filter);

    let module = LoadedModule::open(&args.module).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(2);
    });

    let table = SymbolTable::resolve(&module, LuaApi::SYMBOLS);
    for (name, address) in table.iter() {
        print_slot(name, address.map(|a| a.as_ptr() as usize));
    }

    let mut missing = table.missing().len();
    if config.intercept_update {
        let address = module.lookup(&config.update_symbol);
        print_slot(&config.update_symbol, address.map(|a| a.as_ptr() as usize));
        missing += usize::from(address.is_none());
    }

    if missing > 0 {
        println!("\n{missing} symbol(s) missing from {}", module.label());
        process::exit(1);
    }
    println!("\nall symbols resolved in {}", module.label());
}

fn print_slot(name: &str, address: Option<usize>) {
    match address {
        Some(address) => println!("  {name:<28} {address:#018x}"),
        None => println!("  {name:<28} MISSING"),
    }
}
