//! Authenticated request pipeline.
//!
//! Every call goes through the same steps: merge headers, run the session
//! pre-flight check, send, then map the response onto `ApiError`. Auth-class
//! failures clear the session here so the outcome is the same no matter
//! which caller triggered them; the caller learns about it through the
//! returned error (and the optional auth-failure hook) and decides how to
//! get the user back to the login route.

pub mod error;
pub mod multipart;
pub mod resources;
pub mod transport;

use crate::session::{AuthFailure, SessionStore};
use error::{error_message, ApiError, LOGIN_ROUTE, NETWORK_ERROR_MESSAGE, UPLOAD_NETWORK_ERROR_MESSAGE};
use multipart::{MultipartBuilder, UploadFile};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use transport::{AbortSignal, HttpRequest, HttpResponse, Method, ProgressFn, Transport, TransportError};

pub type ApiResult<T> = Result<T, ApiError>;

type AuthHook = Arc<dyn Fn(AuthFailure, &str) + Send + Sync>;

/// One JSON API call
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub requires_auth: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::Get,
            body: None,
            headers: Vec::new(),
            requires_auth: true,
        }
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[allow(dead_code)] // For endpoints that need extra headers
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Skip the session pre-flight and never send a bearer token
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }
}

/// Extras for `upload_file_with`
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Additional text parts sent before the file
    pub fields: Vec<(String, String)>,
    pub abort: Option<AbortSignal>,
}

pub struct ApiClient {
    base_url: String,
    store: SessionStore,
    transport: Arc<dyn Transport>,
    on_auth_failure: Option<AuthHook>,
    upload_timeout: Option<Duration>,
}

impl ApiClient {
    pub fn new(base_url: &str, store: SessionStore, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
            transport,
            on_auth_failure: None,
            upload_timeout: None,
        }
    }

    /// Called with the failure kind and the login route whenever the
    /// pipeline ends a session or refuses to start a call for lack of one
    pub fn with_auth_failure_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(AuthFailure, &str) + Send + Sync + 'static,
    {
        self.on_auth_failure = Some(Arc::new(hook));
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    pub fn request<T: DeserializeOwned>(&self, endpoint: &str, options: RequestOptions) -> ApiResult<T> {
        let mut headers = merge_headers(
            vec![("Content-Type".to_string(), "application/json".to_string())],
            options.headers,
        );

        if options.requires_auth {
            let token = self.preflight()?;
            set_header(&mut headers, "Authorization", &format!("Bearer {}", token));
        }

        let body = options
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(ApiError::Encode)?;

        let request = HttpRequest {
            method: options.method,
            url: self.url(endpoint),
            headers,
            body,
            timeout: None,
            abort: None,
        };
        debug!(method = %request.method, url = %request.url, "Sending request");

        let response = self.transport.send(request, None).map_err(|e| {
            warn!("Request to {} failed: {}", endpoint, e);
            ApiError::Network(NETWORK_ERROR_MESSAGE.to_string())
        })?;

        self.handle_response(response)
    }

    pub fn get<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
        self.request(endpoint, RequestOptions::new(Method::Get))
    }

    pub fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, endpoint: &str, body: &B) -> ApiResult<T> {
        let body = serde_json::to_value(body).map_err(ApiError::Encode)?;
        self.request(endpoint, RequestOptions::new(Method::Post).body(body))
    }

    pub fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, endpoint: &str, body: &B) -> ApiResult<T> {
        let body = serde_json::to_value(body).map_err(ApiError::Encode)?;
        self.request(endpoint, RequestOptions::new(Method::Put).body(body))
    }

    pub fn del<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
        self.request(endpoint, RequestOptions::new(Method::Delete))
    }

    /// Multipart upload of `file` as the `file` part, reporting percent sent
    #[allow(dead_code)] // Typed endpoints go through upload_file_with
    pub fn upload_file<T, P>(&self, endpoint: &str, file: &UploadFile, on_progress: P) -> ApiResult<T>
    where
        T: DeserializeOwned,
        P: FnMut(u8),
    {
        self.upload_file_with(endpoint, file, UploadOptions::default(), on_progress)
    }

    pub fn upload_file_with<T, P>(
        &self,
        endpoint: &str,
        file: &UploadFile,
        options: UploadOptions,
        mut on_progress: P,
    ) -> ApiResult<T>
    where
        T: DeserializeOwned,
        P: FnMut(u8),
    {
        let token = self.preflight()?;

        let mut form = MultipartBuilder::new();
        for (name, value) in &options.fields {
            form = form.text(name, value);
        }
        let form = form.file("file", file).finish();

        let request = HttpRequest {
            method: Method::Post,
            url: self.url(endpoint),
            headers: vec![
                ("Content-Type".to_string(), form.content_type),
                ("Authorization".to_string(), format!("Bearer {}", token)),
            ],
            body: Some(form.bytes),
            timeout: self.upload_timeout,
            abort: options.abort,
        };
        debug!(
            url = %request.url,
            file = %file.file_name,
            bytes = file.bytes.len(),
            "Uploading file"
        );

        let mut report = |sent: u64, total: u64| on_progress(percent(sent, total));
        let progress: ProgressFn<'_> = &mut report;
        let response = match self.transport.send(request, Some(progress)) {
            Ok(response) => response,
            Err(TransportError::Aborted) => {
                debug!("Upload to {} aborted", endpoint);
                return Err(ApiError::Aborted);
            }
            Err(TransportError::Network(e)) => {
                warn!("Upload to {} failed: {}", endpoint, e);
                return Err(ApiError::Network(UPLOAD_NETWORK_ERROR_MESSAGE.to_string()));
            }
        };

        self.handle_response(response)
    }

    fn preflight(&self) -> ApiResult<String> {
        self.store
            .bearer_token()
            .map_err(|failure| self.auth_failed(failure))
    }

    fn auth_failed(&self, failure: AuthFailure) -> ApiError {
        warn!(reason = failure.as_str(), "Authentication failed, login required");
        if let Some(hook) = &self.on_auth_failure {
            hook(failure, LOGIN_ROUTE);
        }
        ApiError::from(failure)
    }

    fn handle_response<T: DeserializeOwned>(&self, response: HttpResponse) -> ApiResult<T> {
        if response.status == 401 {
            // The server is authoritative even when a token was attached
            self.store.clear_auth();
            let message = error_message(&response.body, status_text_or(&response, "Unauthorized"));
            self.auth_failed(AuthFailure::Unauthorized);
            return Err(ApiError::Unauthorized { message });
        }

        if !response.is_success() {
            let status_text = status_text_or(&response, "Request failed");
            return Err(ApiError::Http {
                status: response.status,
                status_text: status_text.to_string(),
                message: error_message(&response.body, status_text),
            });
        }

        if response.body.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_value(Value::Null).map_err(ApiError::InvalidResponse);
        }
        serde_json::from_slice(&response.body).map_err(ApiError::InvalidResponse)
    }
}

fn status_text_or<'a>(response: &'a HttpResponse, fallback: &'a str) -> &'a str {
    if response.status_text.is_empty() {
        fallback
    } else {
        &response.status_text
    }
}

/// Integer percent; an empty body counts as complete
pub fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (sent.min(total).saturating_mul(100) / total) as u8
}

/// Defaults first, overrides replace same-named headers (case-insensitive)
fn merge_headers(defaults: Vec<(String, String)>, overrides: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut merged = defaults;
    for (name, value) in overrides {
        set_header(&mut merged, &name, &value);
    }
    merged
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some(entry) => entry.1 = value.to_string(),
        None => headers.push((name.to_string(), value.to_string())),
    }
}
