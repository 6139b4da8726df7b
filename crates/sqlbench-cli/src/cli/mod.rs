pub mod args;
pub mod commands;
pub mod logging;
pub mod progress_view;
