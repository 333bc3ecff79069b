//! Outbound HTTP capability with permission check and request spacing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::redirect::Policy;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::CapabilityError;
use crate::permission::{PermissionSet, PluginPermission};
use crate::protocol::{HttpOptions, HttpResponse};

/// Per-request timeout.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of redirects followed per request.
pub const MAX_REDIRECTS: usize = 3;

/// Default minimum spacing between two requests of one plugin.
pub const DEFAULT_MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(1000);

/// User agent sent with every plugin request.
pub const USER_AGENT: &str = concat!("SecLinter-Plugin/", env!("CARGO_PKG_VERSION"));

const HTTP_TARGET: &str = "seclinter_plugins::capability::http";

/// Performs HTTP requests on behalf of the capability.
///
/// The production implementation is [`ReqwestTransport`]; tests substitute
/// a mock so permission and spacing rules can be checked without a network.
pub trait HttpTransport: Send + Sync {
    /// Issues a GET request.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Http`] when the request fails.
    fn get(&self, url: &Url, options: &HttpOptions) -> Result<HttpResponse, CapabilityError>;

    /// Issues a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Http`] when the request fails.
    fn post(
        &self,
        url: &Url,
        body: &Value,
        options: &HttpOptions,
    ) -> Result<HttpResponse, CapabilityError>;
}

/// Blocking `reqwest` transport.
///
/// A client is built per request so that its runtime thread is joined before
/// the call returns; jailed plugin launches need a single-threaded host.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestTransport;

impl ReqwestTransport {
    fn client(url: &Url) -> Result<Client, CapabilityError> {
        Client::builder()
            .timeout(HTTP_TIMEOUT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|error| http_error(url, &error))
    }

    fn send(
        url: &Url,
        request: RequestBuilder,
        options: &HttpOptions,
    ) -> Result<HttpResponse, CapabilityError> {
        let with_headers = options
            .headers
            .iter()
            .fold(request, |builder, (name, value)| builder.header(name, value));
        let response = with_headers.send().map_err(|error| http_error(url, &error))?;
        into_response(url, response)
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &Url, options: &HttpOptions) -> Result<HttpResponse, CapabilityError> {
        let client = Self::client(url)?;
        Self::send(url, client.get(url.clone()), options)
    }

    fn post(
        &self,
        url: &Url,
        body: &Value,
        options: &HttpOptions,
    ) -> Result<HttpResponse, CapabilityError> {
        let client = Self::client(url)?;
        Self::send(url, client.post(url.clone()).json(body), options)
    }
}

fn into_response(url: &Url, response: Response) -> Result<HttpResponse, CapabilityError> {
    let status = response.status().as_u16();
    let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|text| (name.as_str().to_owned(), text.to_owned()))
        })
        .collect();
    let body = response.text().map_err(|error| http_error(url, &error))?;
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn http_error(url: &Url, error: &reqwest::Error) -> CapabilityError {
    CapabilityError::Http {
        url: url.to_string(),
        message: error.to_string(),
    }
}

/// Spaces requests at least `interval` apart, delaying early callers.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub(crate) const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Blocks until the next request may start and records its start.
    pub(crate) fn acquire(&self) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last {
            let wait = self.interval.saturating_sub(previous.elapsed());
            if !wait.is_zero() {
                debug!(
                    target: HTTP_TARGET,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "delaying plugin request"
                );
                thread::sleep(wait);
            }
        }
        *last = Some(Instant::now());
    }
}

/// HTTP operations available to a plugin.
pub struct HttpCapability {
    enabled: bool,
    transport: Arc<dyn HttpTransport>,
    limiter: RateLimiter,
}

impl fmt::Debug for HttpCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCapability")
            .field("enabled", &self.enabled)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl HttpCapability {
    /// Creates the capability; requests are refused without `net:outbound`.
    #[must_use]
    pub fn new(
        permissions: &PermissionSet,
        transport: Arc<dyn HttpTransport>,
        min_interval: Duration,
    ) -> Self {
        Self {
            enabled: permissions.contains(PluginPermission::NetOutbound),
            transport,
            limiter: RateLimiter::new(min_interval),
        }
    }

    /// Issues a GET request.
    ///
    /// # Errors
    ///
    /// Fails without `net:outbound` (no request is made), for non-HTTP URLs,
    /// or when the transport fails.
    pub fn get(&self, url: &str, options: &HttpOptions) -> Result<HttpResponse, CapabilityError> {
        let parsed = self.prepare(url, "http_get")?;
        self.transport.get(&parsed, options)
    }

    /// Issues a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Fails without `net:outbound` (no request is made), for non-HTTP URLs,
    /// or when the transport fails.
    pub fn post(
        &self,
        url: &str,
        body: &Value,
        options: &HttpOptions,
    ) -> Result<HttpResponse, CapabilityError> {
        let parsed = self.prepare(url, "http_post")?;
        self.transport.post(&parsed, body, options)
    }

    fn prepare(&self, url: &str, operation: &'static str) -> Result<Url, CapabilityError> {
        if !self.enabled {
            return Err(CapabilityError::PermissionDenied {
                permission: PluginPermission::NetOutbound,
                operation,
            });
        }
        let parsed = Url::parse(url).map_err(|error| CapabilityError::InvalidUrl {
            url: url.to_owned(),
            message: error.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CapabilityError::InvalidUrl {
                url: url.to_owned(),
                message: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        self.limiter.acquire();
        Ok(parsed)
    }
}
