//! DocumentDB Client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{master_key_token, DocDbConfig, DocDbError, Document, QueryOptions, Result, SqlQuerySpec};

const API_VERSION: &str = "2018-12-31";

/// Document store operations against a (database, collection) pair.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Run `query` and return rows `skip..skip + limit` of the result.
    /// A `None` limit reads every matching row.
    async fn query_documents(
        &self,
        database: &str,
        collection: &str,
        options: &QueryOptions,
        query: &SqlQuerySpec,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Document>>;

    /// Run a `SELECT VALUE COUNT(1)` query and return the total.
    async fn query_count(
        &self,
        database: &str,
        collection: &str,
        options: &QueryOptions,
        query: &SqlQuerySpec,
    ) -> Result<u64>;

    /// Create or replace a document by id.
    async fn upsert_document(&self, database: &str, collection: &str, document: &Document) -> Result<Document>;

    /// Delete a document by id. Fails with `DocDbError::NotFound` when it is already gone.
    async fn delete_document(&self, database: &str, collection: &str, id: &str) -> Result<()>;
}

/// DocumentDB Client
///
/// Speaks the SQL REST API over `reqwest`, signing every request with the
/// account master key.
#[derive(Clone)]
pub struct DocumentDbClient {
    http: Client,
    config: Arc<DocDbConfig>,
}

#[derive(Deserialize)]
struct QueryPage {
    #[serde(rename = "Documents", default)]
    documents: Vec<Value>,
}

impl DocumentDbClient {
    pub fn new(config: DocDbConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DocDbError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        debug!(endpoint = %config.endpoint, "DocumentDB client created");

        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Check if the account endpoint answers an authenticated request
    pub async fn is_healthy(&self) -> bool {
        match self.signed(Method::GET, "", "", "") {
            Ok(request) => matches!(request.send().await, Ok(r) if r.status().is_success()),
            Err(_) => false,
        }
    }

    fn signed(&self, method: Method, path: &str, resource_type: &str, resource_link: &str) -> Result<RequestBuilder> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let token = master_key_token(
            method.as_str(),
            resource_type,
            resource_link,
            &date,
            &self.config.account_key,
        )?;

        Ok(self
            .http
            .request(method, format!("{}/{}", self.config.endpoint, path))
            .header("authorization", token)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION))
    }

    async fn query_page(
        &self,
        database: &str,
        collection: &str,
        options: &QueryOptions,
        query: &SqlQuerySpec,
        continuation: Option<&str>,
    ) -> Result<(Vec<Value>, Option<String>)> {
        let link = collection_link(database, collection);
        let max_items = options.max_item_count.unwrap_or(self.config.max_item_count);

        let mut request = self
            .signed(Method::POST, &format!("{}/docs", link), "docs", &link)?
            .header("content-type", "application/query+json")
            .header("x-ms-documentdb-isquery", "True")
            .header("x-ms-max-item-count", max_items.to_string());
        if options.enable_cross_partition_query {
            request = request.header("x-ms-documentdb-query-enablecrosspartition", "True");
        }
        if options.enable_scan_in_query {
            request = request.header("x-ms-documentdb-query-enable-scan", "True");
        }
        if let Some(token) = continuation {
            request = request.header("x-ms-continuation", token);
        }

        let response = check(request.body(serde_json::to_vec(query)?).send().await?, &link).await?;
        let next = response
            .headers()
            .get("x-ms-continuation")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let page: QueryPage = response.json().await?;

        Ok((page.documents, next))
    }
}

#[async_trait]
impl StorageClient for DocumentDbClient {
    #[instrument(skip(self, options, query), fields(query = %query.query))]
    async fn query_documents(
        &self,
        database: &str,
        collection: &str,
        options: &QueryOptions,
        query: &SqlQuerySpec,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        let wanted = limit.map(|l| skip.saturating_add(l));
        let mut rows = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let (page, next) = self
                .query_page(database, collection, options, query, continuation.as_deref())
                .await?;
            rows.extend(page);
            if next.is_none() || wanted.is_some_and(|w| rows.len() >= w) {
                break;
            }
            continuation = next;
        }

        debug!(rows = rows.len(), "Query completed");

        rows.into_iter()
            .skip(skip)
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| serde_json::from_value(row).map_err(DocDbError::from))
            .collect()
    }

    #[instrument(skip(self, options, query), fields(query = %query.query))]
    async fn query_count(
        &self,
        database: &str,
        collection: &str,
        options: &QueryOptions,
        query: &SqlQuerySpec,
    ) -> Result<u64> {
        let mut total = 0;
        let mut continuation: Option<String> = None;

        // Cross-partition counts arrive as one partial sum per page.
        loop {
            let (page, next) = self
                .query_page(database, collection, options, query, continuation.as_deref())
                .await?;
            total += page.iter().filter_map(Value::as_u64).sum::<u64>();
            match next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        Ok(total)
    }

    #[instrument(skip(self, document), fields(id = %document.id))]
    async fn upsert_document(&self, database: &str, collection: &str, document: &Document) -> Result<Document> {
        let link = collection_link(database, collection);
        let request = self
            .signed(Method::POST, &format!("{}/docs", link), "docs", &link)?
            .header("x-ms-documentdb-is-upsert", "True")
            .json(document);

        let response = check(request.send().await?, &document.id).await?;
        Ok(response.json().await?)
    }

    #[instrument(skip(self))]
    async fn delete_document(&self, database: &str, collection: &str, id: &str) -> Result<()> {
        let link = format!("{}/docs/{}", collection_link(database, collection), id);
        let request = self.signed(Method::DELETE, &link, "docs", &link)?;

        check(request.send().await?, id).await?;
        Ok(())
    }
}

fn collection_link(database: &str, collection: &str) -> String {
    format!("dbs/{}/colls/{}", database, collection)
}

async fn check(response: Response, resource: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify(status, retry_after, resource, &body))
}

fn classify(status: StatusCode, retry_after: Option<Duration>, resource: &str, body: &str) -> DocDbError {
    match status.as_u16() {
        404 => DocDbError::NotFound {
            id: resource.to_string(),
        },
        408 | 429 | 449 | 503 => DocDbError::Transient {
            message: format!("{} on {}: {}", status, resource, body),
            retry_after,
        },
        _ => DocDbError::Fatal(format!("{} on {}: {}", status, resource, body)),
    }
}

/// Store-suggested backoff: `x-ms-retry-after-ms`, else `Retry-After` seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, "x-ms-retry-after-ms")
        .and_then(|ms| ms.parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| Duration::from_millis(ms as u64))
        .or_else(|| {
            header_str(headers, RETRY_AFTER.as_str())
                .and_then(|secs| secs.parse::<u64>().ok())
                .map(Duration::from_secs)
        })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}
