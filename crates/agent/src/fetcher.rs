//! Turns the data source's offset pagination into one lazy record stream.

use crate::{
    Result,
    source::{Record, RecordSource, RecordType},
    window::Window,
};
use futures::{Stream, TryStreamExt, stream};
use tracing::debug;

/// Stream every `record_type` record created after `window.from` and at or
/// before `window.to`, page by page.
///
/// Pages are requested at offsets `0, page_size, 2 * page_size, ...` only as
/// the consumer pulls. The stream ends after the first page holding fewer
/// than `page_size` records, which may be an empty page. The first error ends
/// the stream; nothing after it is fetched.
///
/// Offsets are only consistent if the source does not change between page
/// requests. Records created or deleted mid-stream may be skipped or seen
/// twice.
pub fn fetch_all<S>(
    source: &S,
    record_type: RecordType,
    window: Window,
    page_size: usize,
) -> impl Stream<Item = Result<Record>> + Send + '_
where
    S: RecordSource + ?Sized,
{
    debug_assert!(page_size > 0, "page size must be positive");

    stream::try_unfold(Some(0usize), move |offset| async move {
        let Some(offset) = offset else {
            return Ok(None);
        };

        let page = source.list(record_type, window, page_size, offset).await?;
        debug!(%record_type, offset, records = page.len(), "fetched page");
        metrics::counter!("payments_agent_pages_fetched", "record_type" => record_type.resource())
            .increment(1);
        metrics::counter!("payments_agent_records_fetched", "record_type" => record_type.resource())
            .increment(page.len() as u64);

        let next = (page.len() >= page_size).then_some(offset + page_size);
        Ok(Some((stream::iter(page.into_iter().map(Ok)), next)))
    })
    .try_flatten()
}
