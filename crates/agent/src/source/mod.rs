pub mod stripe;
pub mod synthetic;

use crate::{Result, window::Window};
use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use stripe::StripeSource;
pub use synthetic::SyntheticSource;

/// Largest page the data source serves.
pub const MAX_PAGE_SIZE: usize = 100;

/// Kind of transactional entity tracked by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RecordType {
    Charge,
    Transfer,
}

impl RecordType {
    /// Record types processed by every run, in processing order.
    pub const TRACKED: [RecordType; 2] = [RecordType::Charge, RecordType::Transfer];

    pub fn name(&self) -> &'static str {
        match self {
            RecordType::Charge => "Charge",
            RecordType::Transfer => "Transfer",
        }
    }

    /// Collection path on the data source.
    pub fn resource(&self) -> &'static str {
        match self {
            RecordType::Charge => "charges",
            RecordType::Transfer => "transfers",
        }
    }

    /// Timestamp field the window predicate applies to.
    pub fn predicate_field(&self) -> &'static str {
        match self {
            RecordType::Charge => "created",
            RecordType::Transfer => "date",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource())
    }
}

/// One charge or transfer. Only the fields the statistics need are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub currency: String,
    pub amount: f64,
    #[serde(default)]
    pub fee: f64,
}

impl Record {
    pub fn new(currency: impl Into<String>, amount: f64, fee: f64) -> Self {
        Self {
            currency: currency.into(),
            amount,
            fee,
        }
    }
}

/// One page of records created inside a window.
#[automock]
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch up to `count` records of `record_type` created inside `window`,
    /// skipping the first `offset`. Results are in a stable order for a fixed
    /// window.
    async fn list(
        &self,
        record_type: RecordType,
        window: Window,
        count: usize,
        offset: usize,
    ) -> Result<Vec<Record>>;
}
