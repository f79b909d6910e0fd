pub mod args;
pub mod commands;

pub use args::{Cli, Commands, PolicyArgs, SelectionArgs};
pub use commands::run;
