//! Lazy traversal of paginated list endpoints.
//!
//! List endpoints return `{ "results": [...], "pagination": { ..., "nextPageURI" } }`.
//! [`PagedRecords`] flattens the pages into a pull-based sequence of records: one GET
//! per page, issued only when the previous page's records are consumed, terminating
//! when `nextPageURI` is null. Early termination issues no further requests.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use datamonster_core::{DmError, Result};

use crate::transport::Transport;

/// Pagination metadata carried by every list page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Total records across all pages.
    pub total_results: u64,
    /// Records per page.
    pub page_size: u64,
    /// Zero-based index of this page.
    pub current_page: u64,
    /// Link to the next page, if any. The wire spells the suffix `URI`, which
    /// `rename_all` alone would miss.
    #[serde(rename = "nextPageURI")]
    pub next_page_uri: Option<String>,
    /// Link to the previous page, if any.
    #[serde(rename = "previousPageURI")]
    pub previous_page_uri: Option<String>,
}

/// One page of a list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    /// Pagination metadata.
    pub pagination: Pagination,
    /// The records on this page, in server order.
    pub results: Vec<T>,
}

/// A single-pass cursor over every record of a paginated endpoint.
///
/// Not restartable: each cursor issues fresh requests, and a fully drained cursor
/// yields nothing more.
#[derive(Debug)]
pub struct PagedRecords<T> {
    transport: Arc<dyn Transport>,
    next_page: Option<String>,
    buffer: VecDeque<T>,
}

impl<T: DeserializeOwned> PagedRecords<T> {
    /// Creates a cursor starting at `start_path`. No request is issued until the
    /// first record is pulled.
    pub fn new(transport: Arc<dyn Transport>, start_path: impl Into<String>) -> Self {
        Self {
            transport,
            next_page: Some(start_path.into()),
            buffer: VecDeque::new(),
        }
    }

    /// Pulls the next record, fetching the next page when the current one is
    /// exhausted. Returns `Ok(None)` once every page has been consumed.
    pub async fn try_next(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            let Some(path) = self.next_page.take() else {
                return Ok(None);
            };
            let value = self.transport.get(&path, &[]).await?.into_json()?;
            let page: Page<T> =
                serde_json::from_value(value).map_err(|e| DmError::Parse(e.to_string()))?;
            self.buffer = page.results.into();
            self.next_page = page.pagination.next_page_uri;
        }
    }

    /// Drains the cursor into a vector.
    pub async fn try_collect(mut self) -> Result<Vec<T>> {
        let mut records = Vec::new();
        while let Some(record) = self.try_next().await? {
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    use crate::transport::Payload;

    /// Serves queued JSON pages in order and records requested paths.
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        pages: Mutex<VecDeque<Value>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn with_pages(pages: Vec<Value>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, path: &str, _headers: &[(&str, &str)]) -> Result<Payload> {
            self.requests.lock().unwrap().push(path.to_string());
            let page = self
                .pages
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request");
            Ok(Payload::Json(page))
        }

        async fn post(
            &self,
            _path: &str,
            _body: &Value,
            _headers: &[(&str, &str)],
        ) -> Result<Payload> {
            unreachable!("pagination never posts")
        }
    }

    fn page(records: &[u64], total: u64, current: u64, next: Option<&str>) -> Value {
        json!({
            "pagination": {
                "totalResults": total,
                "pageSize": records.len(),
                "currentPage": current,
                "nextPageURI": next,
                "previousPageURI": null,
            },
            "results": records,
        })
    }

    #[tokio::test]
    async fn yields_all_records_in_page_order() {
        let transport = Arc::new(ScriptedTransport::with_pages(vec![
            page(&[1, 2], 4, 0, Some("/rest/v1/thing?p=1")),
            page(&[3, 4], 4, 1, None),
        ]));
        let cursor: PagedRecords<u64> = PagedRecords::new(transport.clone(), "/rest/v1/thing");

        let records = cursor.try_collect().await.unwrap();
        assert_eq!(records, vec![1, 2, 3, 4]);
        // The second request must follow the link issued by the first page.
        assert_eq!(
            transport.requests(),
            vec!["/rest/v1/thing", "/rest/v1/thing?p=1"]
        );
    }

    #[tokio::test]
    async fn is_lazy_and_supports_early_termination() {
        let transport = Arc::new(ScriptedTransport::with_pages(vec![page(
            &[1, 2],
            4,
            0,
            Some("/rest/v1/thing?p=1"),
        )]));
        let mut cursor: PagedRecords<u64> = PagedRecords::new(transport.clone(), "/rest/v1/thing");

        assert!(transport.requests().is_empty());
        assert_eq!(cursor.try_next().await.unwrap(), Some(1));
        assert_eq!(cursor.try_next().await.unwrap(), Some(2));
        // Stopped before pulling into page two: only one request went out.
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn page_links_use_the_wire_capitalization() {
        let page: Page<u64> = serde_json::from_value(json!({
            "pagination": {
                "totalResults": 2,
                "pageSize": 1,
                "currentPage": 0,
                "nextPageURI": "/rest/v1/thing?p=1",
                "previousPageURI": null,
            },
            "results": [1],
        }))
        .unwrap();
        assert_eq!(
            page.pagination.next_page_uri.as_deref(),
            Some("/rest/v1/thing?p=1")
        );
        assert_eq!(page.pagination.previous_page_uri, None);
    }

    #[tokio::test]
    async fn empty_listing_terminates_immediately() {
        let transport = Arc::new(ScriptedTransport::with_pages(vec![page(&[], 0, 0, None)]));
        let mut cursor: PagedRecords<u64> = PagedRecords::new(transport, "/rest/v1/thing");
        assert_eq!(cursor.try_next().await.unwrap(), None);
        assert_eq!(cursor.try_next().await.unwrap(), None);
    }
}
