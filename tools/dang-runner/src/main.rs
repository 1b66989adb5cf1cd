// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! dang-runner - load a bytecode fixture and run it to completion.
//!
//! There is no compiler in this workspace, so the fixture format below
//! is a test/demo convenience, not a specified wire format: 8 bytes of
//! little-endian `entry_pc` followed by the raw bytecode stream.

use std::fs;
use std::io::{self, BufReader};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dang_rt::vm::{Io, Thread};

/// Run a dang bytecode fixture.
#[derive(Parser, Debug)]
#[command(name = "dang-runner")]
#[command(version = "0.1.0")]
#[command(about = "Run a dang bytecode fixture (8-byte LE entry_pc + raw bytecode, not a compiler output format)")]
struct Args {
    /// Path to the fixture file.
    fixture: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let bytes = match fs::read(&args.fixture) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("dang-runner: reading {}: {e}", args.fixture);
            return ExitCode::FAILURE;
        }
    };
    if bytes.len() < 8 {
        eprintln!("dang-runner: fixture too short for an 8-byte entry_pc header");
        return ExitCode::FAILURE;
    }
    let entry_pc = u64::from_le_bytes(bytes[..8].try_into().expect("checked length")) as usize;
    let bytecode: Arc<[u8]> = Arc::from(bytes[8..].to_vec().into_boxed_slice());

    if entry_pc >= bytecode.len() {
        eprintln!("dang-runner: entry_pc {entry_pc} is past the end of the bytecode stream");
        return ExitCode::FAILURE;
    }

    let io = Io::new(io::stdout(), io::stderr(), BufReader::new(io::stdin()));
    let thread = Thread::new(bytecode, entry_pc, io);
    thread.run();
    ExitCode::SUCCESS
}
