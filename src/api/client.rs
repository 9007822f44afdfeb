//! Authenticated HTTP client for the AutoCare REST API
//!
//! Wraps reqwest::Client with bearer token injection and status mapping.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// REST failure, classified so callers can branch on "not found".
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("401 Unauthorized for {0}; token may be invalid, run 'autocare login'")]
    Unauthorized(String),
    #[error("HTTP {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

/// Escape one path segment: `a b/c` becomes `a%20b%2Fc`.
pub fn segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .map(|part| if part == "+" { "%20" } else { part })
        .collect()
}

/// Authenticated client bound to one API base URL.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Absolute URL for an API path such as `/chat/send`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| ApiError::Http {
                url: url.clone(),
                source,
            })?;

        let resp = check_response(resp, &url).await?;
        resp.json()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Http {
                url: url.clone(),
                source,
            })?;

        let resp = check_response(resp, &url).await?;
        resp.json()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }

    /// PUT without a body, ignoring whatever the server returns.
    pub async fn put_empty(&self, path: &str) -> Result<(), ApiError> {
        let url = self.url(path);
        tracing::debug!("PUT {}", url);

        let resp = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| ApiError::Http {
                url: url.clone(),
                source,
            })?;

        check_response(resp, &url).await?;
        Ok(())
    }
}

/// Map a non-success status to the matching `ApiError`.
fn classify(status: StatusCode, url: &str, body: String) -> ApiError {
    match status {
        StatusCode::NOT_FOUND => ApiError::NotFound(url.to_string()),
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized(url.to_string()),
        _ => ApiError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        },
    }
}

/// Check HTTP response status code and return a clear error on failure.
pub(crate) async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify(status, url, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let client = ApiClient::new("http://localhost:8080/api/", "t");
        assert_eq!(client.base_url(), "http://localhost:8080/api");
        assert_eq!(
            client.url("/chat/appointment/5"),
            "http://localhost:8080/api/chat/appointment/5"
        );
        assert_eq!(client.url("chat/send"), "http://localhost:8080/api/chat/send");
    }

    #[test]
    fn test_segment_escapes_path_characters() {
        assert_eq!(segment("42"), "42");
        assert_eq!(segment("a b/c?d"), "a%20b%2Fc%3Fd");
        assert_eq!(segment("1+1"), "1%2B1");
    }

    #[test]
    fn test_classify_status() {
        let url = "http://h/chat/appointment/9";
        assert!(classify(StatusCode::NOT_FOUND, url, String::new()).is_not_found());
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, url, String::new()),
            ApiError::Unauthorized(_)
        ));
        match classify(StatusCode::BAD_GATEWAY, url, "upstream".into()) {
            ApiError::Status { status, body, .. } => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
