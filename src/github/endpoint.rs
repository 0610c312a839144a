use url::Url;

use crate::config::PUBLIC_API_HOST;
use crate::error::ExporterError;

const PUBLIC_API_ROOT: &str = "https://api.github.com";

/// The API root every request of the process is bound to.
///
/// Built once from the configured `api_url`; never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    root: String,
    enterprise: bool,
}

impl RemoteEndpoint {
    /// Resolve the configured API root.
    ///
    /// `api.github.com` (bare or as a URL) is the public API,
    /// everything else goes through [`enterprise_api_url`].
    pub fn resolve(api_url: &str) -> Result<Self, ExporterError> {
        if is_public(api_url) {
            return Ok(Self {
                root: PUBLIC_API_ROOT.to_string(),
                enterprise: false,
            });
        }

        Ok(Self {
            root: enterprise_api_url(api_url)?,
            enterprise: true,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_enterprise(&self) -> bool {
        self.enterprise
    }

    /// Absolute URL for an API path such as `repos/acme/api/actions/runners`.
    pub fn join(&self, path: &str) -> String {
        format!("{}/{}", self.root, path.trim_start_matches('/'))
    }
}

fn is_public(api_url: &str) -> bool {
    if api_url == PUBLIC_API_HOST {
        return true;
    }
    Url::parse(api_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == PUBLIC_API_HOST))
        .unwrap_or(false)
}

/// Rewrite a user-supplied Enterprise Server URL into its REST root.
///
/// Enterprise Server serves the API under `/api/v3/` of the instance
/// host, while `api.`-style hosts already are API roots and must not
/// be suffixed again. The result never ends with `/`, otherwise the
/// token endpoint would be built with a double slash.
///
/// Examples:
/// - `https://ghe.example.com`         -> `https://ghe.example.com/api/v3`
/// - `https://ghe.example.com/api/v3/` -> `https://ghe.example.com/api/v3`
/// - `https://api.ghe.example.com`     -> `https://api.ghe.example.com`
pub fn enterprise_api_url(base_url: &str) -> Result<String, ExporterError> {
    let endpoint = Url::parse(base_url).map_err(|e| {
        ExporterError::Configuration(format!("enterprise url '{base_url}' is invalid: {e}"))
    })?;

    let host = endpoint.host_str().ok_or_else(|| {
        ExporterError::Configuration(format!("enterprise url '{base_url}' has no host"))
    })?;
    let authority = match endpoint.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut path = endpoint.path().to_string();
    if !path.ends_with('/') {
        path.push('/');
    }
    if !path.ends_with("/api/v3/") && !host.starts_with("api.") && !host.contains(".api.") {
        path.push_str("api/v3/");
    }

    let path = path.strip_suffix('/').unwrap_or(&path);
    Ok(format!("{}://{}{}", endpoint.scheme(), authority, path))
}
