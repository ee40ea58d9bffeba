pub mod commands;
pub mod handlers;

pub use commands::{CLAP_STYLING, command_argument_builder};
