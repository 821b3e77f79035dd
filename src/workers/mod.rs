pub mod auto_release;

pub use auto_release::{AutoReleaseConfig, AutoReleaseWorker};
