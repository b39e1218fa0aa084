pub mod analytics_sweeper;

pub use analytics_sweeper::{run_sweep, start_analytics_sweeper, SweepSummary};
