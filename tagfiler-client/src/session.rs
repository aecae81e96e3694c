use crate::config::Config;
use crate::http::{Client, Error};
use log::info;
use query_state::{AddPolicy, QueryStateStore};
use tagfiler_ql::{Decoder, Encoder, TagTypeRegistry, Versions};

/// Everything needed to encode requests for one open table view.
pub struct Session {
    pub registry: TagTypeRegistry,
    pub store: QueryStateStore,
    base: String,
    versions: Versions,
    config: Config,
}

impl Session {
    /// Restores the view from a bookmark, or opens the configured default
    /// view when `link` carries no query.
    pub async fn open(client: &Client, config: Config, link: Option<&str>) -> Result<Self, Error> {
        let registry = client.load_registry().await?;
        let page_size = config.preview.page_size;
        let query = link.and_then(|l| Decoder::new(&registry).decode_deep_link(l));

        let (mut store, base, versions) = match query {
            Some(query) => {
                let base = match query.base.is_empty() {
                    true => config.catalog.subject_base(),
                    false => query.base.clone(),
                };
                (
                    QueryStateStore::from_query(&query, page_size),
                    base,
                    query.options.versions,
                )
            }
            None => (
                QueryStateStore::new(page_size),
                config.catalog.subject_base(),
                config.catalog.versions,
            ),
        };

        if store.columns().is_empty() {
            let view = &config.catalog.default_view;
            info!("Opening view {}", view);
            let columns = client.load_view(view).await?;
            store.add_columns(columns, AddPolicy::Prepend);
        }

        Ok(Self {
            registry,
            store,
            base,
            versions,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn encoder(&self) -> Encoder<'_> {
        Encoder::new(&self.base, &self.registry).with_versions(self.versions)
    }
}
