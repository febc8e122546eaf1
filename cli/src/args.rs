use clap::ArgAction;
use clap::Args as Arguments;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;


/// A command line interface for stacksym.
#[derive(Debug, Parser)]
#[clap(version = env!("VERSION"))]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
    /// Increase verbosity (can be supplied multiple times).
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbosity: u8,
}


#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the stack trace of this program.
    Trace(Trace),
    /// Crash this program and report the crash.
    Crash(Crash),
}


/// A type representing the `trace` command.
#[derive(Debug, Arguments)]
pub struct Trace {
    /// Report inlined function calls as separate frames.
    #[clap(long)]
    pub inline: bool,
    /// Only print function names (or addresses, if unknown).
    #[clap(long)]
    pub terse: bool,
    /// Do not print frame addresses.
    #[clap(long)]
    pub no_address: bool,
    /// Do not print source file and line information.
    #[clap(long)]
    pub no_location: bool,
    /// Colorize the output.
    #[clap(long)]
    pub color: bool,
    /// Print raw addresses only, using the signal safe reporter.
    #[clap(long, conflicts_with_all = ["inline", "terse", "no_address", "no_location", "color"])]
    pub unsymbolized: bool,
    /// The number of times to print the trace.
    #[clap(long, default_value_t = 1)]
    pub repeat: usize,
}


/// The signals that the `crash` command can trigger.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Signal {
    /// Dereference an invalid pointer.
    Segv,
    /// Abort the program.
    Abrt,
    /// Raise `SIGBUS`.
    Bus,
    /// Raise `SIGTERM`.
    Term,
}


/// A type representing the `crash` command.
#[derive(Debug, Arguments)]
pub struct Crash {
    /// The signal to crash with.
    #[clap(long, value_enum, default_value_t = Signal::Segv)]
    pub signal: Signal,
    /// The depth of the call chain to crash in.
    #[clap(long, default_value_t = 3)]
    pub depth: usize,
}
