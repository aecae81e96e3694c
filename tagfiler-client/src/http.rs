use crate::config::HttpConfig;
use crate::schemas::{self, Row, ViewRow};
use async_trait::async_trait;
use log::{debug, warn};
use query_state::RangeSource;
use rand::Rng;
use reqwest::header::USER_AGENT;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tagfiler_ql::{escape, registry_url, tags_url, unescape, TagDefRow, TagTypeRegistry};

const CLIENT_AGENT: &str = "Tagfiler/1.0";
const ERROR_DESCRIPTION: &str = "X-Error-Description";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },

    #[error("status {status} from {url}: {}", .description.as_deref().unwrap_or(.body))]
    Status {
        url: String,
        status: u16,
        body: String,
        description: Option<String>,
    },

    #[error("session is not authorized, log in again")]
    Unauthorized,

    #[error("unexpected response from {url}: {reason}")]
    Response { url: String, reason: String },

    #[error("{0}")]
    State(query_state::Error),

    #[error("refresh was superseded by a newer one")]
    Superseded,
}

impl From<query_state::Error> for Error {
    fn from(error: query_state::Error) -> Self {
        Self::State(error)
    }
}

impl From<tagfiler_ql::Error> for Error {
    fn from(error: tagfiler_ql::Error) -> Self {
        Self::State(error.into())
    }
}

/// Status codes worth retrying: gateway and server timeouts.
#[inline]
fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Randomized exponential delay before retry `attempt` (1-based).
pub fn retry_delay(attempt: u32, max_delay: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.75..1.25);
    let millis = (jitter * 10f64.powi(attempt as i32) * 0.00001).ceil();
    Duration::from_millis(millis as u64).min(max_delay)
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    home: String,
    max_retries: u32,
    max_delay: Duration,
}

impl Client {
    pub fn new(home: &str, config: &HttpConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|source| Error::Request {
                url: home.to_string(),
                source,
            })?;

        Ok(Self {
            http,
            home: home.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            max_delay: config.max_delay(),
        })
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    async fn send(&self, method: Method, url: &str) -> Result<Response, Error> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("{} {}", method, url);
            let result = self
                .http
                .request(method.clone(), url)
                .header(USER_AGENT, CLIENT_AGENT)
                .send()
                .await;

            let retryable = match &result {
                Ok(response) => is_retryable(response.status()),
                Err(e) => e.is_timeout() || e.is_connect(),
            };
            if retryable && attempt <= self.max_retries {
                let delay = retry_delay(attempt, self.max_delay);
                warn!(
                    "Request to {} failed (attempt {}), retrying in {:?}",
                    url, attempt, delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let response = result.map_err(|source| Error::Request {
                url: url.to_string(),
                source,
            })?;
            return check_status(url, response).await;
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        self.send(Method::GET, url)
            .await?
            .json()
            .await
            .map_err(|e| Error::Response {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    pub async fn put(&self, url: &str) -> Result<(), Error> {
        self.send(Method::PUT, url).await.map(|_| ())
    }

    pub async fn delete(&self, url: &str) -> Result<(), Error> {
        self.send(Method::DELETE, url).await.map(|_| ())
    }

    pub async fn load_registry(&self) -> Result<TagTypeRegistry, Error> {
        let rows: Vec<TagDefRow> = self.get_json(&registry_url(&self.home)).await?;
        debug!("Loaded {} tag definitions", rows.len());
        Ok(rows.into_iter().collect())
    }

    /// Tags of a stored view, in display order. An unknown view has no tags.
    pub async fn load_view(&self, name: &str) -> Result<Vec<String>, Error> {
        let url = format!(
            "{}/subject/view={}({})",
            self.home,
            escape(name),
            escape("view tags")
        );
        let rows: Vec<ViewRow> = self.get_json(&url).await?;
        Ok(rows.into_iter().find_map(|r| r.tags).unwrap_or_default())
    }

    /// Adds `values` of `tag` to every subject matched by `predicates`.
    pub async fn set_tag_values(
        &self,
        predicates: &str,
        tag: &str,
        values: &[String],
    ) -> Result<(), Error> {
        self.put(&tags_url(&self.home, predicates, tag, values)).await
    }

    /// Removes `values` of `tag`, or the whole tag when `values` is empty.
    pub async fn delete_tag_values(
        &self,
        predicates: &str,
        tag: &str,
        values: &[String],
    ) -> Result<(), Error> {
        self.delete(&tags_url(&self.home, predicates, tag, values))
            .await
    }
}

async fn check_status(url: &str, response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(Error::Unauthorized);
    }

    let description = response
        .headers()
        .get(ERROR_DESCRIPTION)
        .and_then(|v| v.to_str().ok())
        .map(unescape);
    let body = response.text().await.unwrap_or_default();
    Err(Error::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
        description,
    })
}

#[async_trait]
impl RangeSource for Client {
    type Error = Error;

    async fn count(&self, url: &str, tag: &str) -> Result<u64, Self::Error> {
        let rows: Vec<Row> = self.get_json(url).await?;
        schemas::range_count(&rows, tag).ok_or_else(|| Error::Response {
            url: url.to_string(),
            reason: format!("no count for '{}'", tag),
        })
    }

    async fn values(&self, url: &str, tag: &str) -> Result<Vec<String>, Self::Error> {
        let rows: Vec<Row> = self.get_json(url).await?;
        Ok(schemas::range_values(&rows, tag))
    }
}
