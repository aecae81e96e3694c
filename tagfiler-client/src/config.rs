use serde::Deserialize;
use std::fs::File;
use std::num::NonZeroUsize;
use std::time::Duration;
use tagfiler_ql::Versions;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tagfiler/config.yaml";
const DEFAULT_CATALOG_URL: &str = "https://localhost/tagfiler";
const DEFAULT_VIEW: &str = "default";
const DEFAULT_PAGE_SIZE: usize = 25;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub preview: PreviewConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub url: String,
    pub versions: Versions,
    pub default_view: String,
}

impl CatalogConfig {
    /// Catalog root without a trailing slash.
    pub fn home(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Predicate base path of subject queries.
    pub fn subject_base(&self) -> String {
        format!("{}/subject/", self.home())
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CATALOG_URL.to_string(),
            versions: Versions::Latest,
            default_view: DEFAULT_VIEW.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub page_size: NonZeroUsize,
    pub select_limit: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            page_size: NonZeroUsize::new(DEFAULT_PAGE_SIZE).unwrap_or(NonZeroUsize::MIN),
            select_limit: query_state::SELECT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub max_delay_ms: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            max_retries: 10,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    IO(std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(serde_yml::Error),
}

pub fn load(filename: &str) -> Result<Config, Error> {
    let file = File::open(filename).map_err(Error::IO)?;
    serde_yml::from_reader(file).map_err(Error::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: Config = serde_yml::from_str(
            r#"
catalog:
  url: https://example.org/tagfiler/
  versions: any
preview:
  page_size: 10
"#,
        )
        .unwrap();

        assert_eq!(config.catalog.home(), "https://example.org/tagfiler");
        assert_eq!(
            config.catalog.subject_base(),
            "https://example.org/tagfiler/subject/"
        );
        assert_eq!(config.catalog.versions, Versions::Any);
        assert_eq!(config.catalog.default_view, "default");
        assert_eq!(config.preview.page_size.get(), 10);
        assert_eq!(config.preview.select_limit, 50);
        assert_eq!(config.http.max_retries, 10);
        assert_eq!(config.http.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_rejects_zero_page_size() {
        let result: Result<Config, _> = serde_yml::from_str("preview:\n  page_size: 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        match load("/nonexistent/tagfiler.yaml") {
            Err(Error::IO(_)) => {}
            other => panic!("{:?}", other),
        }
    }
}
