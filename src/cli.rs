use std::path::PathBuf;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "f90front", about = "Front end for a free-form Fortran subset")]
pub enum Command {
    /// Parse a source file and dump its concrete syntax tree.
    Parse {
        /// Source file to parse.
        #[structopt(parse(from_os_str))]
        input: PathBuf,
    },
    /// Parse and lower a source file, dumping the typed program unit.
    Check {
        /// Source file to check.
        #[structopt(parse(from_os_str))]
        input: PathBuf,
    },
}
