//! # apfschk CLI Entry Point
//!
//! Binary entry point for the APFS consistency checker.
//!
//! ## Usage
//!
//! ```bash
//! # Check an image
//! apfschk ./disk.img
//!
//! # Show version
//! apfschk --version
//!
//! # Show help
//! apfschk --help
//! ```
//!
//! Diagnostics for corrupt images go to standard output as a single line
//! naming the failing block or condition; the process exits non-zero.
//! Trace output (RUST_LOG) goes to standard error.

use std::env;
use std::path::PathBuf;

use apfschk::Container;
use eyre::{bail, Result};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        println!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let mut image: Option<PathBuf> = None;

    for arg in &args[1..] {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("apfschk {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other if other.starts_with('-') => {
                bail!("unknown option: {}", other);
            }
            path => {
                if image.is_some() {
                    bail!("multiple images specified");
                }
                image = Some(PathBuf::from(path));
            }
        }
    }

    let image = match image {
        Some(p) => p,
        None => {
            print_usage();
            return Ok(());
        }
    };

    let container = Container::open(&image)?;
    let volumes = container.check()?;

    println!(
        "{}: verified {} volume(s), no corruption found",
        image.display(),
        volumes
    );
    Ok(())
}

fn print_usage() {
    println!("Usage: apfschk [options] <image>");
    println!();
    println!("Check the consistency of an APFS container image (read-only).");
    println!();
    println!("Options:");
    println!("  -h, --help     Show this help message");
    println!("  -v, --version  Show version information");
}
