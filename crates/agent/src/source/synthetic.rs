use super::{Record, RecordSource, RecordType};
use crate::{Result, window::Window};
use async_trait::async_trait;
use rand::Rng;

/// Records per page returned in test mode.
pub const SYNTHETIC_PAGE_LEN: usize = 3;

/// Random `usd` records for exercising the pipeline without a data source.
///
/// Amounts are in 200..=999 and fees are 3 to 10 % of the amount. Only the
/// first page holds records; any later offset is empty, so pagination ends
/// for every page size.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticSource;

impl SyntheticSource {
    pub fn generate(count: usize) -> Vec<Record> {
        let mut rng = rand::rng();
        (0..count)
            .map(|_| {
                let amount = rng.random_range(200..=999) as f64;
                let fee_rate = rng.random_range(3..=10) as f64 / 100.0;
                Record::new("usd", amount, fee_rate * amount)
            })
            .collect()
    }
}

#[async_trait]
impl RecordSource for SyntheticSource {
    async fn list(
        &self,
        _record_type: RecordType,
        _window: Window,
        count: usize,
        offset: usize,
    ) -> Result<Vec<Record>> {
        if offset > 0 {
            return Ok(Vec::new());
        }
        Ok(Self::generate(SYNTHETIC_PAGE_LEN.min(count)))
    }
}
