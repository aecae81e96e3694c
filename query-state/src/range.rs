use crate::QueryStateStore;
use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use tagfiler_ql::{Encoder, RangeMode};

/// Largest number of distinct values offered as a pick list.
pub const SELECT_LIMIT: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum RangeValues {
    Empty,
    Values(Vec<String>),
    TooMany(u64),
}

/// Backend answering the `range=count` and `range=values` probes.
#[async_trait]
pub trait RangeSource: Sync {
    type Error: Send;

    async fn count(&self, url: &str, tag: &str) -> Result<u64, Self::Error>;

    async fn values(&self, url: &str, tag: &str) -> Result<Vec<String>, Self::Error>;
}

/// Distinct values of `tag` over the rows matched by the current filter,
/// leaving out the tag under edit. Values are fetched only when there are
/// between one and `limit` of them.
pub async fn probe<S>(
    source: &S,
    store: &QueryStateStore,
    encoder: &Encoder<'_>,
    tag: &str,
    limit: u64,
) -> Result<RangeValues, S::Error>
where
    S: RangeSource,
    S::Error: From<crate::Error>,
{
    let url = store.range_url(encoder, tag, RangeMode::Count)?;
    let count = source.count(&url, tag).await?;
    debug!("Tag {} has {} distinct values", tag, count);

    if count == 0 {
        return Ok(RangeValues::Empty);
    }
    if count > limit {
        return Ok(RangeValues::TooMany(count));
    }

    let url = store.range_url(encoder, tag, RangeMode::Values)?;
    let mut values = source.values(&url, tag).await?;
    values.sort();
    Ok(RangeValues::Values(values))
}
