//! Wire types shared by the `snapsched` CLI and serve mode.

pub mod commands;
pub mod frames;

pub use frames::{Command, CommandFrame, CommandResult, OutputFormat, ResultFrame};
