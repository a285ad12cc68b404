//! Jargon — command-line driver.
//!
//! Compiles and runs one Slang source file, printing the decoded final value
//! to stdout.  The exit code is zero iff the machine halts normally; other
//! terminal statuses map to distinct nonzero codes.

use std::env;
use std::fs;
use std::process;

use anyhow::{Context, Result};

use jargon::config::Config;
use jargon::vm::StdinInput;
use jargon::JargonError;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut config = Config::default();
    let mut path: Option<String> = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--verbose" => config.verbose = true,
            "--stack" => {
                config.stack_max = parse_limit(&args[0], iter.next(), "--stack");
            }
            "--heap" => {
                config.heap_max = parse_limit(&args[0], iter.next(), "--heap");
            }
            "-h" | "--help" => {
                print_usage(&args[0]);
                return Ok(());
            }
            other if path.is_none() && !other.starts_with('-') => {
                path = Some(other.to_string());
            }
            other => {
                eprintln!("Error: unexpected argument `{other}`");
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let Some(path) = path else {
        print_usage(&args[0]);
        process::exit(1);
    };

    let source =
        fs::read_to_string(&path).with_context(|| format!("failed to read `{path}`"))?;

    let mut input = StdinInput;
    match jargon::run_source(&source, &config, &mut input) {
        Ok(value) => {
            println!("{value}");
            Ok(())
        }
        Err(JargonError::Stopped(status)) => {
            eprintln!("Error: VM stopped with status {status}");
            process::exit(status.code());
        }
        Err(error) => {
            eprintln!("Error: {error}");
            process::exit(1);
        }
    }
}

fn parse_limit(program: &str, value: Option<&String>, flag: &str) -> usize {
    match value.and_then(|v| v.parse().ok()) {
        Some(n) => n,
        None => {
            eprintln!("Error: {flag} requires a positive integer");
            print_usage(program);
            process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Jargon — Slang compiler and virtual machine");
    eprintln!("Usage: {program} [options] <source_file>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -v, --verbose    trace the compiled listing and every VM step");
    eprintln!("      --stack N    stack capacity in cells (default 1024)");
    eprintln!("      --heap N     heap capacity in cells (default 4096)");
    eprintln!("  -h, --help       print this message");
}
