//! Command-line front end: configuration layering, terminal input and the
//! session flows behind each subcommand.

pub mod runner;
pub mod settings;
pub mod terminal;

pub use runner::{EvolveOptions, best, evolve, record, train};
pub use settings::ConfigArgs;
pub use terminal::{KeyAction, TerminalInput, render_status, watch_status};
