pub mod console;
pub mod summary;

pub use console::print_summary;
pub use summary::{summarize, MetricSummary, RunSummary};
