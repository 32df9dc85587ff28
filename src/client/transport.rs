use crate::prelude::*;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::utils::slow_warn::warn_if_slow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// `None` for an empty body (e.g. an answer to a delete).
    pub fn json_opt(&self) -> Result<Option<Value>> {
        if self.body.trim().is_empty() {
            return Ok(None);
        }
        self.json().map(Some)
    }

    pub fn into_error(self, url: impl Into<String>) -> Error {
        Error::Http {
            status: self.status,
            url: url.into(),
            body: self.body,
        }
    }
}

/// Multipart upload to an object-storage url handed out by the platform.
#[derive(Debug, Clone)]
pub struct UploadForm {
    pub url: String,
    pub fields: serde_json::Map<String, Value>,
    pub file: Bytes,
    pub timeout: Duration,
}

/// Moves requests over the wire. Status handling, auth and retries belong to
/// the session on top of it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the response whatever its status.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;

    /// Unauthenticated GET of a signed url. Non-2xx is an error.
    async fn download(&self, url: &str, timeout: Duration) -> Result<Bytes>;

    /// Non-2xx is an error.
    async fn upload(&self, form: UploadForm) -> Result<()>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    slow_threshold: Duration,
}

impl ReqwestTransport {
    pub fn new(slow_threshold: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            slow_threshold,
        })
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let url = strip_query(request.url().as_str()).to_string();
        let method = request.method().clone();
        let resp = warn_if_slow(
            &|| format!("HTTP {method} {url}"),
            self.slow_threshold,
            self.client.execute(request),
        )
        .await?;
        Ok(resp)
    }

    async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let url = resp.url().clone();
        let body = resp.text().await.unwrap_or_default();
        Err(http_error(status, &url, body))
    }
}

/// Signed urls carry credentials in the query string; keep them out of
/// errors and logs.
pub(crate) fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

fn http_error(status: StatusCode, url: &reqwest::Url, body: String) -> Error {
    Error::Http {
        status,
        url: strip_query(url.as_str()).to_string(),
        body,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.as_reqwest(), &request.url)
            .timeout(request.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let resp = self.execute(builder.build()?).await?;
        let status = resp.status();
        let body = resp.text().await?;
        Ok(ApiResponse { status, body })
    }

    async fn download(&self, url: &str, timeout: Duration) -> Result<Bytes> {
        let request = self.client.get(url).timeout(timeout).build()?;
        let resp = Self::error_for_status(self.execute(request).await?).await?;
        Ok(resp.bytes().await?)
    }

    async fn upload(&self, form: UploadForm) -> Result<()> {
        let mut multipart = reqwest::multipart::Form::new();
        for (name, value) in form.fields {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            multipart = multipart.text(name, value);
        }
        let part = reqwest::multipart::Part::bytes(form.file.to_vec()).file_name("file");
        multipart = multipart.part("file", part);

        let request = self
            .client
            .post(&form.url)
            .timeout(form.timeout)
            .multipart(multipart)
            .build()?;
        Self::error_for_status(self.execute(request).await?).await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_body_is_no_json() {
        let resp = ApiResponse::new(StatusCode::NO_CONTENT, "");
        assert_eq!(resp.json_opt().unwrap(), None);
        let resp = ApiResponse::new(StatusCode::OK, "{\"id\": 4}");
        assert_eq!(resp.json_opt().unwrap(), Some(json!({"id": 4})));
    }

    #[test]
    fn into_error_keeps_status_and_body() {
        let err = ApiResponse::new(StatusCode::BAD_REQUEST, "bad name").into_error("https://x/api/a/");
        assert_eq!(err.http_status(), Some(StatusCode::BAD_REQUEST));
        assert!(err.to_string().ends_with("bad name"));
    }

    #[test]
    fn storage_errors_drop_the_signature() {
        let url = reqwest::Url::parse(
            "https://bucket.test/uploads/abc?X-Amz-Signature=secret&X-Amz-Expires=60",
        )
        .unwrap();
        let err = http_error(StatusCode::FORBIDDEN, &url, "expired".to_string());
        let text = err.to_string();
        assert!(text.starts_with("HTTP 403 Forbidden from https://bucket.test/uploads/abc\n"));
        assert!(!text.contains("secret"));
        assert_eq!(strip_query("https://x.test/a/"), "https://x.test/a/");
    }
}
