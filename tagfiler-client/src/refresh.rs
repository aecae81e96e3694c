use crate::http::{Client, Error};
use crate::schemas::{self, Preview, Row};
use log::{debug, info};
use query_state::QueryStateStore;
use tagfiler_ql::Encoder;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct State {
    last_url: Option<String>,
    generation: u64,
    token: Option<CancellationToken>,
}

/// Issues preview requests for a store, dropping redundant ones and any
/// response overtaken by a newer refresh.
pub struct Refresher {
    client: Client,
    state: Mutex<State>,
}

impl Refresher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            state: Mutex::new(State::default()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetches the row count and the visible page. Returns `Ok(None)` when the
    /// request would be identical to the last one issued and `force` is unset.
    pub async fn refresh(
        &self,
        store: &QueryStateStore,
        encoder: &Encoder<'_>,
        force: bool,
    ) -> Result<Option<Preview>, Error> {
        let rows_url = store.rows_url(encoder)?;
        let count_url = store.count_url(encoder)?;

        let (generation, token) = {
            let mut state = self.state.lock().await;
            if !force && state.last_url.as_deref() == Some(rows_url.as_str()) {
                debug!("Preview of {} is current, skipping", rows_url);
                return Ok(None);
            }

            if let Some(previous) = state.token.take() {
                previous.cancel();
            }
            let token = CancellationToken::new();
            state.generation += 1;
            state.last_url = Some(rows_url.clone());
            state.token = Some(token.clone());
            (state.generation, token)
        };

        let result = tokio::select! {
            _ = token.cancelled() => return Err(Error::Superseded),
            result = self.fetch(&count_url, &rows_url) => result,
        };

        let mut state = self.state.lock().await;
        if state.generation != generation {
            return Err(Error::Superseded);
        }
        state.token = None;
        let preview = match result {
            Ok(preview) => preview,
            Err(e) => {
                // A failed request is never current, so the same one may be retried.
                state.last_url = None;
                return Err(e);
            }
        };
        info!(
            "Preview shows {} of {} rows",
            preview.rows.len(),
            preview.total
        );
        Ok(Some(preview))
    }

    /// Forgets the last issued request so the next refresh always runs.
    pub async fn invalidate(&self) {
        self.state.lock().await.last_url = None;
    }

    async fn fetch(&self, count_url: &str, rows_url: &str) -> Result<Preview, Error> {
        let counts: Vec<Row> = self.client.get_json(count_url).await?;
        let total = schemas::range_count(&counts, "id").ok_or_else(|| Error::Response {
            url: count_url.to_string(),
            reason: "no count for 'id'".to_string(),
        })?;
        let rows = match total {
            0 => Vec::new(),
            _ => self.client.get_json(rows_url).await?,
        };

        Ok(Preview {
            url: rows_url.to_string(),
            total,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use query_state::AddPolicy;
    use serde_json::json;
    use std::num::NonZeroUsize;
    use std::time::Duration;
    use tagfiler_ql::{Operator, Predicate, TagTypeRegistry};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(status: &str) -> QueryStateStore {
        let mut store = QueryStateStore::new(NonZeroUsize::new(2).unwrap());
        store.add_column("name", AddPolicy::Prepend);
        store.set_column_filter("status", vec![Predicate::new(Operator::Eq, [status])]);
        store
    }

    async fn mount_preview(server: &MockServer, status: &str, total: u64, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(format!("/subject/status={}(id)", status)))
            .and(query_param("range", "count"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{ "id": total }]))
                    .set_delay(delay),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/subject/status={}(name;id)", status)))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "name": "a"},
                {"id": 2, "name": "b"}
            ])))
            .mount(server)
            .await;
    }

    fn refresher(server: &MockServer) -> Refresher {
        Refresher::new(Client::new(&server.uri(), &HttpConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_refresh_skips_unchanged_request() {
        let server = MockServer::start().await;
        mount_preview(&server, "active", 5, Duration::ZERO).await;
        let registry = TagTypeRegistry::new();
        let base = format!("{}/subject/", server.uri());
        let encoder = Encoder::new(&base, &registry);
        let refresher = refresher(&server);
        let store = store("active");

        let preview = refresher.refresh(&store, &encoder, false).await.unwrap().unwrap();
        assert_eq!(preview.total, 5);
        assert_eq!(preview.rows.len(), 2);
        assert_eq!(preview.rows[1]["name"], json!("b"));

        assert!(refresher.refresh(&store, &encoder, false).await.unwrap().is_none());
        assert!(refresher.refresh(&store, &encoder, true).await.unwrap().is_some());

        refresher.invalidate().await;
        assert!(refresher.refresh(&store, &encoder, false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_count_skips_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("range", "count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 0 }])))
            .expect(1)
            .mount(&server)
            .await;
        let registry = TagTypeRegistry::new();
        let base = format!("{}/subject/", server.uri());
        let encoder = Encoder::new(&base, &registry);

        let preview = refresher(&server)
            .refresh(&store("none"), &encoder, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(preview.total, 0);
        assert!(preview.rows.is_empty());
    }

    #[tokio::test]
    async fn test_newer_refresh_supersedes_older() {
        let server = MockServer::start().await;
        mount_preview(&server, "slow", 9, Duration::from_millis(500)).await;
        mount_preview(&server, "fast", 3, Duration::ZERO).await;
        let registry = TagTypeRegistry::new();
        let base = format!("{}/subject/", server.uri());
        let encoder = Encoder::new(&base, &registry);
        let refresher = refresher(&server);
        let (slow, fast) = (store("slow"), store("fast"));

        let (older, newer) = tokio::join!(refresher.refresh(&slow, &encoder, false), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            refresher.refresh(&fast, &encoder, false).await
        });

        assert!(matches!(older, Err(Error::Superseded)));
        assert_eq!(newer.unwrap().unwrap().total, 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_can_be_repeated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("range", "count"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_preview(&server, "active", 5, Duration::ZERO).await;
        let registry = TagTypeRegistry::new();
        let base = format!("{}/subject/", server.uri());
        let encoder = Encoder::new(&base, &registry);
        let refresher = refresher(&server);
        let store = store("active");

        match refresher.refresh(&store, &encoder, false).await {
            Err(Error::Status { status: 500, .. }) => {}
            other => panic!("{:?}", other),
        }

        let preview = refresher.refresh(&store, &encoder, false).await.unwrap().unwrap();
        assert_eq!(preview.total, 5);
        assert!(refresher.refresh(&store, &encoder, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_count_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("range", "count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "wrong": 7 }])))
            .mount(&server)
            .await;
        let registry = TagTypeRegistry::new();
        let base = format!("{}/subject/", server.uri());
        let encoder = Encoder::new(&base, &registry);

        match refresher(&server).refresh(&store("active"), &encoder, false).await {
            Err(Error::Response { url, .. }) => assert!(url.contains("range=count")),
            other => panic!("{:?}", other),
        }
    }
}
