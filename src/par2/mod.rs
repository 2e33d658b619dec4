//! PAR2 recovery file generation
//!
//! Delegates the actual parity arithmetic to an external `par2` or `parpar`
//! binary; this module only picks the invocation, streams its progress, and
//! collects the files it produced.
//!
//! - [`CliPar2Executor`]: spawns the configured binary
//! - [`NoOpPar2Executor`]: used when PAR2 generation is disabled

mod cli;
mod noop;
mod parser;
mod traits;

pub use cli::CliPar2Executor;
pub use noop::NoOpPar2Executor;
pub use traits::{Par2Executor, Par2Progress};
