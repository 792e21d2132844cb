pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod report;
pub mod stats;

pub use config::*;
pub use dispatcher::*;
pub use executor::*;
pub use report::*;
pub use stats::*;
