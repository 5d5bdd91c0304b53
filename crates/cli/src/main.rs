//! nyx: command-line driver for the nyx compiler front end.
//!
//! Parses the input files through one registry, generates the plan, and
//! writes the serialized plan JSON to stdout for the code-generator
//! plugin host. Exit code is 0 on success, 1 on any failure along the
//! pipeline; partial output is never written.

use clap::Parser;
use nyx_core::{serialize, Filesystem, Registry, SourceProvider, StderrSink, NYX_VERSION};
use std::process;

/// nyx binary data format compiler.
#[derive(Parser)]
#[command(name = "nyx", about = "nyx binary data format compiler", disable_version_flag = true)]
struct Cli {
    /// Append a user include directory
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    include: Vec<String>,

    /// Output plugin language
    #[arg(
        short = 'l',
        long = "lang",
        visible_alias = "language",
        value_name = "LANG",
        default_value = "c++"
    )]
    lang: String,

    /// Base output directory
    #[arg(short = 'o', long = "outdir", value_name = "DIR", default_value = ".")]
    outdir: String,

    /// Option passed through to the plugin
    #[arg(short = 'O', long = "opt", visible_alias = "option", value_name = "OPT")]
    options: Vec<String>,

    /// Override the system import directory
    #[arg(
        short = 'S',
        long = "sysroot",
        value_name = "DIR",
        default_value = "/usr/include/nyx"
    )]
    sysroot: String,

    /// Print version and exit
    #[arg(short = 'v', long = "version", visible_alias = "ver")]
    version: bool,

    /// Input files
    #[arg(value_name = "FILE", required_unless_present = "version")]
    files: Vec<String>,
}

fn main() {
    process::exit(run(Cli::parse()));
}

fn run(cli: Cli) -> i32 {
    if cli.version {
        println!("nyx {}", NYX_VERSION);
        return 0;
    }

    let filesystem = Filesystem::new(&cli.sysroot, &cli.include);
    let mut sink = StderrSink;

    let mut registry = Registry::new();
    for file in &cli.files {
        if let Err(error) = registry.parse(&filesystem, file, &mut sink) {
            eprintln!("{}", error);
            return 1;
        }
    }

    let plan = match nyx_core::plan::generate(&registry, &mut sink) {
        Ok(plan) => plan,
        Err(error) => {
            eprintln!("{}", error);
            return 1;
        }
    };

    // the plugin host loads nyxlang-<lang>; flag a missing plugin early
    // but keep emitting the plan, the host is a separate process
    let plugin = format!("nyxlang-{}.lua", cli.lang);
    if filesystem.locate(&plugin).is_none() {
        eprintln!("Unable to locate plugin for {}", cli.lang);
    }

    let mut options = cli.options.clone();
    if cli.outdir != "." {
        options.push(format!("outdir={}", cli.outdir));
    }

    let bundle = serialize(&plan, &options);
    match serde_json::to_string_pretty(&bundle) {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(error) => {
            eprintln!("Error serializing plan: {}", error);
            1
        }
    }
}
