use clap::Parser;
use failure::{Fail, ResultExt};
use kscope::{Error, ErrorKind, Session, SessionConfig};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

/// Compiles and runs a Kaleidoscope source file one statement at a time.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Source file to run.
    source: PathBuf,

    /// Print every function once it compiles.
    #[arg(long)]
    dump_ir: bool,

    /// Do not print the unit left open at the end of input.
    #[arg(long)]
    no_final_dump: bool,
}

#[cfg(not(feature = "llvm"))]
fn engine() -> Result<kscope::Interpreter, Error> {
    Ok(kscope::Interpreter::new())
}

#[cfg(feature = "llvm")]
fn engine() -> Result<kscope::jit::llvm::LlvmEngine, Error> {
    kscope::jit::llvm::LlvmEngine::new()
}

fn run(args: &Args) -> Result<(), Error> {
    let source = fs::read_to_string(&args.source)
        .context(ErrorKind::Io(args.source.display().to_string()))?;
    let config = SessionConfig {
        dump_ir: args.dump_ir,
    };
    let mut session = Session::new(source, engine()?, config);

    let stderr = io::stderr();
    let mut out = stderr.lock();
    session.run(&mut out)?;
    if !args.no_final_dump {
        write!(out, "{}", session.module()).ok();
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        match e.cause() {
            Some(cause) => eprintln!("Error: {}: {}", e, cause),
            None => eprintln!("Error: {}", e),
        }
        process::exit(1);
    }
}
