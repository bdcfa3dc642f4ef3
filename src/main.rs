use std::path::Path;
use std::process;

use anyhow::Context;
use structopt::StructOpt;

use f90front::cli::Command;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    match Command::from_args() {
        Command::Parse { input } => {
            let source = read_source(&input)?;
            let filename = input.to_string_lossy();
            match f90front::parse(&source, &filename) {
                Ok(program) => println!("{:#?}", program),
                Err(errors) => fail(errors.len()),
            }
        }
        Command::Check { input } => {
            let source = read_source(&input)?;
            let filename = input.to_string_lossy();
            match f90front::analyze(&source, &filename) {
                Ok(unit) => println!("{:#?}", unit),
                Err(errors) => fail(errors.len()),
            }
        }
    }
    Ok(())
}

fn read_source(input: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(input).with_context(|| format!("cannot read {}", input.display()))
}

fn fail(count: usize) -> ! {
    log::debug!("aborting after {} diagnostics", count);
    process::exit(1);
}
