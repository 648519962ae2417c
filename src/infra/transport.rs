//! HTTP seam between the API client and the network.

use std::{future::Future, pin::Pin, time::Duration};

use reqwest::{header, Client, Method, Url};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PortalError;
use crate::util::version::user_agent;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A request relative to the configured base URL.
///
/// The path is kept as raw segments; the transport percent-encodes each one
/// when it builds the URL, so an email or tracking code can never add a level.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer: Option<String>,
    pub request_id: Uuid,
}

impl ApiRequest {
    pub fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
            bearer: None,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, segments)
    }

    pub fn post<I, S>(segments: I, body: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::POST, segments).with_body(body)
    }

    pub fn patch<I, S>(segments: I, body: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::PATCH, segments).with_body(body)
    }

    pub fn delete<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::DELETE, segments)
    }

    /// Unencoded `/a/b/c` form, for logs and request matching.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

/// Raw response; status classification happens in the API client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    /// Any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request. Non-2xx statuses are returned as responses, not errors;
/// `Err` means the request never completed.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, PortalError>>;
}

/// `reqwest`-backed transport used outside tests.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
    base_url: Url,
}

impl ReqwestTransport {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, PortalError> {
        let http = Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base_url })
    }

    /// Append the request's segments (percent-encoded) and query pairs to the base URL.
    fn url(&self, request: &ApiRequest) -> Result<Url, PortalError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| PortalError::InvalidInput(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(&request.segments);
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, PortalError>> {
        Box::pin(async move {
            let url = self.url(&request)?;

            let mut builder = self
                .http
                .request(request.method.clone(), url)
                .header(REQUEST_ID_HEADER, request.request_id.to_string());
            if let Some(token) = &request.bearer {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            tracing::debug!(
                method = %request.method,
                path = %request.path(),
                request_id = %request.request_id,
                "sending request"
            );
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            tracing::debug!(request_id = %request.request_id, status, "received response");
            Ok(ApiResponse { status, body })
        })
    }
}
