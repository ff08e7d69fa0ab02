pub mod agent;
pub mod aggregator;
mod error;
pub mod fetcher;
pub mod http;
pub mod reporter;
pub mod settings;
pub mod source;
pub mod watermark;
pub mod window;

pub use agent::{Agent, RunStage, RunSummary};
pub use error::{Error, Result};
