use crate::utils::error::{MigrationError, Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use url::Url;

/// Storage REST version sent with every blob and table request.
pub const STORAGE_API_VERSION: &str = "2021-08-06";

const ERROR_BODY_LIMIT: usize = 300;

/// Builds the single HTTP client shared by every adapter of a run.
pub fn build_client(request_timeout: Option<Duration>) -> Result<Client> {
    let mut builder = Client::builder().user_agent(concat!("azmigrate/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

#[derive(Clone)]
pub enum Credential {
    /// Shared access signature appended to every request URL.
    Sas(String),
    Bearer(String),
    /// Search-service admin or query key.
    ApiKey(String),
    Anonymous,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Sas(_) => "Sas",
            Self::Bearer(_) => "Bearer",
            Self::ApiKey(_) => "ApiKey",
            Self::Anonymous => "Anonymous",
        };
        write!(f, "Credential::{}(..)", kind)
    }
}

/// Base URL of one service plus the credential used against it.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    base: Url,
    credential: Credential,
}

impl ServiceEndpoint {
    pub fn new(base: &str, credential: Credential) -> Result<Self> {
        let base = Url::parse(base).map_err(|e| MigrationError::InvalidConfigValueError {
            field: "endpoint".to_string(),
            value: base.to_string(),
            reason: format!("Invalid URL format: {}", e),
        })?;
        if base.cannot_be_a_base() {
            return Err(MigrationError::config(format!(
                "Endpoint '{}' cannot carry a path",
                base
            )));
        }
        Ok(Self { base, credential })
    }

    /// Endpoint URL without query string, safe to log and store in reports.
    pub fn display(&self) -> String {
        let mut shown = self.base.clone();
        shown.set_query(None);
        shown.as_str().trim_end_matches('/').to_string()
    }

    /// Resolves `segments` below the base path; each one is percent-encoded
    /// as a single path segment.
    pub fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        if let Credential::Sas(token) = &self.credential {
            let token = token.trim_start_matches('?');
            let combined = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{}&{}", existing, token),
                _ => token.to_string(),
            };
            url.set_query(Some(&combined));
        }
        url
    }

    pub fn request(&self, client: &Client, method: Method, url: Url) -> RequestBuilder {
        let builder = client.request(method, url);
        match &self.credential {
            Credential::Bearer(token) => builder.bearer_auth(token),
            Credential::ApiKey(key) => builder.header("api-key", key),
            Credential::Sas(_) | Credential::Anonymous => builder,
        }
    }

    /// Request with the storage service version header set.
    pub fn storage_request(&self, client: &Client, method: Method, url: Url) -> RequestBuilder {
        self.request(client, method, url)
            .header("x-ms-version", STORAGE_API_VERSION)
    }
}

/// Maps a non-success response onto the per-unit error taxonomy.
pub async fn check(response: Response, resource: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify(status, resource, &body))
}

/// Like [`check`] for create calls: a 409 whose service error code is
/// `exists_code` (e.g. `ContainerAlreadyExists`) becomes
/// `DestinationAlreadyExists`. Any other conflict stays a transfer failure.
pub async fn check_create(response: Response, resource: &str, exists_code: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_code = header_str(&response, "x-ms-error-code").map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::CONFLICT
        && (error_code.as_deref() == Some(exists_code) || body.contains(exists_code))
    {
        return Err(MigrationError::DestinationAlreadyExists {
            resource: resource.to_string(),
            existing_size: None,
        });
    }
    Err(classify(status, resource, &body))
}

pub fn classify(status: StatusCode, resource: &str, body: &str) -> MigrationError {
    let detail = summarize_body(status, body);
    match status {
        StatusCode::NOT_FOUND => MigrationError::not_found(resource, detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            MigrationError::permission(resource, detail)
        }
        // 409 也可能是 lease 或 pending copy，不代表目的端已有資料
        _ => MigrationError::transfer(resource, detail),
    }
}

fn summarize_body(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("HTTP {}", status);
    }
    let mut cut = body.len().min(ERROR_BODY_LIMIT);
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("HTTP {}: {}", status, &body[..cut])
}

pub fn header_u64(response: &Response, name: &str) -> Option<u64> {
    header_str(response, name).and_then(|v| v.parse().ok())
}

pub fn header_str<'r>(response: &'r Response, name: &str) -> Option<&'r str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
