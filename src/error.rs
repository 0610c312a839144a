use thiserror::Error;

// ------------------------------------------------------------
// Startup errors
// ------------------------------------------------------------
//
// Everything in here is fatal: the orchestrator returns it to
// `main`, which exits before any fetcher or the scrape surface
// is started.
//
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Malformed URL, unknown metric family, bad label field, ...
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The client could not be built from the configured credential
    #[error("authentication error: {0}")]
    Authentication(String),

    /// A gauge vector could not be created or registered
    /// (most likely a duplicate metric name)
    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("workflow cache unavailable: {0}")]
    CacheUnavailable(String),
}

// ------------------------------------------------------------
// Remote call errors
// ------------------------------------------------------------
//
// Never fatal. A fetcher logs them and keeps the previous gauge
// values of the affected scope until the next cycle.
//
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("installation token exchange failed: {0}")]
    Token(String),

    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
