use serde::Serialize;

use sensor_api::{MeasurementRecord, MeasurementStore, PageQuery};

use crate::cursor;
use crate::error::PageError;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 200;

/// Page size from a raw query value. Anything outside `1..=MAX_LIMIT`,
/// including non-numbers, silently becomes `DEFAULT_LIMIT`.
pub fn parse_limit(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .map(clamp_limit)
        .unwrap_or(DEFAULT_LIMIT)
}

pub fn clamp_limit(limit: usize) -> usize {
    if (1..=MAX_LIMIT).contains(&limit) {
        limit
    } else {
        DEFAULT_LIMIT
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub sensor_id: Option<String>,
    pub limit: usize,
    /// Token from a previous page. Empty counts as absent.
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub items: Vec<MeasurementRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// One page of history, newest first.
///
/// Asks storage for one row more than requested; its presence is what sets
/// `has_more`. Rows inserted after the cursor was issued sort before it and
/// never show up on later pages.
pub async fn fetch_page(store: &dyn MeasurementStore, req: &PageRequest) -> Result<Page, PageError> {
    let limit = clamp_limit(req.limit);
    let after = match req.cursor.as_deref() {
        Some(token) if !token.is_empty() => Some(cursor::decode(token)?),
        _ => None,
    };
    let sensor_id = req.sensor_id.clone().filter(|s| !s.is_empty());

    let query = PageQuery {
        sensor_id,
        after,
        limit: limit + 1,
    };
    let mut items = store.query_page(&query).await?;

    let has_more = items.len() > limit;
    items.truncate(limit);
    let next_cursor = if has_more {
        items.last().map(|r| cursor::encode(r.page_key()))
    } else {
        None
    };

    Ok(Page {
        items,
        next_cursor,
        has_more,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_falls_back_to_default() {
        assert_eq!(parse_limit(None), DEFAULT_LIMIT);
        assert_eq!(parse_limit(Some("")), DEFAULT_LIMIT);
        assert_eq!(parse_limit(Some("abc")), DEFAULT_LIMIT);
        assert_eq!(parse_limit(Some("0")), DEFAULT_LIMIT);
        assert_eq!(parse_limit(Some("-3")), DEFAULT_LIMIT);
        assert_eq!(parse_limit(Some("201")), DEFAULT_LIMIT);
        assert_eq!(parse_limit(Some("1")), 1);
        assert_eq!(parse_limit(Some("200")), 200);
    }
}
