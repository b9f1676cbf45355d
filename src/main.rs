// rv2a64 - RISC-V RV64I to AArch64 dynamic binary translator
//
// Usage:
//   rv2a64 program.elf             execute from the ELF entry point
//   rv2a64 program.elf function    execute a named function; the process
//                                  exit code is guest a0 at termination

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use rv2a64::Translator;

#[derive(Parser, Debug)]
#[command(name = "rv2a64")]
#[command(about = "RISC-V RV64I to AArch64 dynamic binary translator")]
#[command(version)]
struct Args {
    /// Input RISC-V ELF binary
    input: PathBuf,

    /// Function to execute instead of the entry point
    function: Option<String>,

    /// Write translated output to a file (legacy mode, unsupported)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();

    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    if args.output.is_some() {
        anyhow::bail!("ahead-of-time output is not supported; run the binary directly");
    }

    let mut translator = Translator::load(&args.input)?;

    match &args.function {
        Some(name) => match translator.run_function(name)? {
            Some(result) => {
                log::info!("{} returned {}", name, result);
                Ok(ExitCode::from(result as u8))
            }
            None => {
                eprintln!("error: function '{}' not found", name);
                std::process::exit(-1);
            }
        },
        None => {
            let result = translator.run()?;
            log::info!("program returned {}", result);
            Ok(ExitCode::SUCCESS)
        }
    }
}
