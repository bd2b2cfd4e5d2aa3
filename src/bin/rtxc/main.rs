// src/bin/rtxc/main.rs
//! Command-line front end for the rule compiler

use std::ffi::OsString;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::{bail, Context};
use structural_transfer::{
    compile_source, disassemble, grammar_source, link_sources, parser, GrammarConfig,
    ReductionConfig, ReductionEngine,
};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage:
  rtxc compile [-r] <rulefile> <outfile>
  rtxc compile3 <stage1> <stage2> <stage3> <outfile>
  rtxc disassemble [-r] <binfile> <outfile>
  rtxc grammar [--config <json>] <rulefile> <outfile>
  rtxc reduce [--config <json>] <rulefile>    (stdin to stdout)";

pub fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("{e:#}");
        exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let mut args = pico_args::Arguments::from_env();

    if args.contains(["-h", "--help"]) {
        println!("{USAGE}");
        return Ok(());
    }

    let Some(command) = args.subcommand()? else {
        bail!("missing command\n{USAGE}");
    };

    match command.as_str() {
        "compile" => {
            let readable = args.contains(["-r", "--readable"]);
            let input: PathBuf = args.free_from_str()?;
            let output: PathBuf = args.free_from_str()?;
            finish(args)?;

            let program = compile_source(&read_text(&input)?)
                .with_context(|| format!("compiling {}", input.display()))?;
            if readable {
                write_atomic(&output, program.to_readable()?.as_bytes())?;
            } else {
                write_atomic(&output, &program.to_bytes())?;
            }
        }
        "compile3" => {
            let stages: [PathBuf; 3] = [
                args.free_from_str()?,
                args.free_from_str()?,
                args.free_from_str()?,
            ];
            let output: PathBuf = args.free_from_str()?;
            finish(args)?;

            let [first, second, third] = [
                read_text(&stages[0])?,
                read_text(&stages[1])?,
                read_text(&stages[2])?,
            ];
            let program = link_sources([first.as_str(), second.as_str(), third.as_str()])
                .context("linking stages")?;
            write_atomic(&output, &program.to_bytes())?;
        }
        "disassemble" => {
            let readable = args.contains(["-r", "--readable"]);
            let input: PathBuf = args.free_from_str()?;
            let output: PathBuf = args.free_from_str()?;
            finish(args)?;

            let bytes = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let listing = disassemble(&bytes).with_context(|| format!("decoding {}", input.display()))?;
            let text = if readable {
                listing.readable()
            } else {
                listing.to_string()
            };
            write_atomic(&output, text.as_bytes())?;
        }
        "grammar" => {
            let config_path: Option<PathBuf> = args.opt_value_from_str("--config")?;
            let input: PathBuf = args.free_from_str()?;
            let output: PathBuf = args.free_from_str()?;
            finish(args)?;

            let config = match config_path {
                Some(path) => GrammarConfig::from_json(&read_text(&path)?)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => GrammarConfig::default(),
            };
            let grammar = grammar_source(&read_text(&input)?, &config)
                .with_context(|| format!("lowering {}", input.display()))?;
            write_atomic(&output, grammar.as_bytes())?;
        }
        "reduce" => {
            let config_path: Option<PathBuf> = args.opt_value_from_str("--config")?;
            let input: PathBuf = args.free_from_str()?;
            finish(args)?;

            let config = match config_path {
                Some(path) => ReductionConfig::from_json(&read_text(&path)?)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ReductionConfig::default(),
            };
            let set = parser::parse(&read_text(&input)?)
                .with_context(|| format!("parsing {}", input.display()))?;
            let engine = ReductionEngine::new(&set, config)?;

            let mut stream = String::new();
            io::stdin().read_to_string(&mut stream)?;
            let output = engine.process(&stream)?;

            let mut stdout = io::stdout().lock();
            stdout.write_all(output.as_bytes())?;
            stdout.flush()?;
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }

    Ok(())
}

fn finish(args: pico_args::Arguments) -> anyhow::Result<()> {
    let rest: Vec<OsString> = args.finish();
    if !rest.is_empty() {
        bail!("unexpected arguments: {rest:?}");
    }
    Ok(())
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Write next to the destination first so a failed run never leaves a
/// partial file behind
fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    let temp = path.with_file_name(name);

    fs::write(&temp, bytes).with_context(|| format!("writing {}", temp.display()))?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e).with_context(|| format!("replacing {}", path.display()));
    }
    Ok(())
}
