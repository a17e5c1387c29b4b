//! Historical event search.
//!
//! Pagination is an explicit loop: position advances by the records
//! received, and the loop ends when the device stops reporting `MORE`,
//! returns an empty page, the result cap is reached, or the page cap is hit.
//! The page cap bounds devices that report more results indefinitely.

use crate::client::{DeviceProtocolClient, RequestBody};
use crate::error::DeviceResult;
use acsync_core::constants::{
    MAJOR_ACCESS_CONTROL, PATH_EVENT_SEARCH, PATH_EVENT_SEARCH_JSON, SEARCH_MINOR_CODES,
};
use acsync_protocol::{RawDeviceEvent, SearchPage, SearchRequest, TimeWindow};
use reqwest::Method;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Search endpoint flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchVariant {
    /// JSON envelope, one pagination loop per minor code.
    Json,
    /// XML envelope, category filter only.
    Xml,
}

impl SearchVariant {
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            SearchVariant::Json => SearchVariant::Xml,
            SearchVariant::Xml => SearchVariant::Json,
        }
    }

    /// Whether the device filters by serial server-side. Neither does.
    #[must_use]
    pub fn supports_serial_filter(self) -> bool {
        false
    }
}

impl std::fmt::Display for SearchVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchVariant::Json => write!(f, "json"),
            SearchVariant::Xml => write!(f, "xml"),
        }
    }
}

/// Limits of one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchQuery {
    pub window: Option<TimeWindow>,
    /// Cap on records collected per pagination loop.
    pub max_results: u32,
}

impl SearchQuery {
    #[must_use]
    pub fn window(window: TimeWindow) -> Self {
        Self {
            window: Some(window),
            max_results: u32::MAX,
        }
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }
}

impl DeviceProtocolClient {
    /// Search with `preferred`, falling back to the other variant when the
    /// preferred endpoint answers with an error status or an undecodable body.
    ///
    /// # Errors
    /// The fallback's error when both variants fail, or the preferred
    /// variant's error when it does not allow fallback (transport, lockout).
    pub async fn search(
        &self,
        preferred: SearchVariant,
        query: SearchQuery,
    ) -> DeviceResult<Vec<RawDeviceEvent>> {
        match self.search_variant(preferred, query).await {
            Ok(events) => Ok(events),
            Err(e) if e.allows_variant_fallback() => {
                warn!(
                    base_url = %self.base_url(),
                    variant = %preferred,
                    error = %e,
                    "Search failed, falling back to {} variant",
                    preferred.other()
                );
                self.search_variant(preferred.other(), query).await
            }
            Err(e) => Err(e),
        }
    }

    /// Search with one variant, without fallback.
    ///
    /// # Errors
    /// Transport, auth, lockout and decode failures.
    pub async fn search_variant(
        &self,
        variant: SearchVariant,
        query: SearchQuery,
    ) -> DeviceResult<Vec<RawDeviceEvent>> {
        let events = match variant {
            SearchVariant::Xml => self.paginate(variant, None, query).await?,
            SearchVariant::Json => {
                let mut merged = Vec::new();
                for minor in SEARCH_MINOR_CODES {
                    merged.extend(self.paginate(variant, Some(minor), query).await?);
                }
                merged
            }
        };
        info!(
            base_url = %self.base_url(),
            variant = %variant,
            count = events.len(),
            "Historical search complete"
        );
        Ok(events)
    }

    /// Search and keep only records with a serial greater than `last_serial`.
    ///
    /// Records without a numeric serial are kept; the ledger deduplicates them.
    ///
    /// # Errors
    /// Same as [`search`](Self::search).
    pub async fn search_newer_than(
        &self,
        preferred: SearchVariant,
        query: SearchQuery,
        last_serial: Option<i64>,
    ) -> DeviceResult<Vec<RawDeviceEvent>> {
        let mut events = self.search(preferred, query).await?;
        if let Some(floor) = last_serial
            && !preferred.supports_serial_filter()
        {
            let before = events.len();
            events.retain(|e| e.integer(&["serialNo"]).is_none_or(|serial| serial > floor));
            debug!(
                base_url = %self.base_url(),
                last_serial = floor,
                kept = events.len(),
                dropped = before - events.len(),
                "Filtered already-stored serials"
            );
        }
        Ok(events)
    }

    async fn paginate(
        &self,
        variant: SearchVariant,
        minor: Option<i64>,
        query: SearchQuery,
    ) -> DeviceResult<Vec<RawDeviceEvent>> {
        let search_id = Uuid::new_v4().to_string();
        let max_pages = self.config.max_search_pages;
        let mut events: Vec<RawDeviceEvent> = Vec::new();
        let mut position: u32 = 0;

        for page_no in 0..max_pages {
            let collected = u32::try_from(events.len()).unwrap_or(u32::MAX);
            let remaining = query.max_results.saturating_sub(collected);
            if remaining == 0 {
                return Ok(events);
            }

            let request = SearchRequest {
                search_id: search_id.clone(),
                position,
                max_results: self.config.page_size.min(remaining),
                minor,
                window: query.window,
                utc_offset: self.config.utc_offset,
            };
            let page = self.fetch_page(variant, &request).await?;

            let fetched = page.events.len();
            debug!(
                variant = %variant,
                minor = ?minor,
                position,
                fetched,
                total = ?page.total_matches,
                "Fetched search page"
            );
            events.extend(page.events.into_iter().map(|event| match minor {
                // JSON records are tagged with the code they were queried by.
                Some(code) => event
                    .with_field("minor", code)
                    .with_field("major", MAJOR_ACCESS_CONTROL),
                None => event,
            }));
            position = position.saturating_add(u32::try_from(fetched).unwrap_or(u32::MAX));

            if !page.has_more || fetched == 0 {
                return Ok(events);
            }
            if page_no + 1 < max_pages {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        warn!(
            base_url = %self.base_url(),
            variant = %variant,
            minor = ?minor,
            pages = max_pages,
            "Device still reports more results after page cap, stopping"
        );
        Ok(events)
    }

    async fn fetch_page(
        &self,
        variant: SearchVariant,
        request: &SearchRequest,
    ) -> DeviceResult<SearchPage> {
        match variant {
            SearchVariant::Json => {
                let body = RequestBody::json(request.to_json()?);
                let response = self
                    .execute(Method::POST, PATH_EVENT_SEARCH_JSON, Some(&body))
                    .await?;
                Ok(SearchPage::from_json(&response.bytes().await?)?)
            }
            SearchVariant::Xml => {
                let body = RequestBody::xml(request.to_xml());
                let response = self
                    .execute(Method::POST, PATH_EVENT_SEARCH, Some(&body))
                    .await?;
                Ok(SearchPage::from_xml(&response.text().await?)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_other() {
        assert_eq!(SearchVariant::Json.other(), SearchVariant::Xml);
        assert_eq!(SearchVariant::Xml.other(), SearchVariant::Json);
    }

    #[test]
    fn test_query_builders() {
        let query = SearchQuery {
            window: None,
            max_results: 10,
        }
        .with_max_results(5);
        assert_eq!(query.max_results, 5);
    }
}
