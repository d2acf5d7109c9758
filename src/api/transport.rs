//! HTTP transport seam.
//!
//! The pipeline speaks to the network only through `Transport`, so tests
//! can swap in a recording mock. `UreqTransport` is the real thing.

use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared flag that cancels an in-flight upload
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    #[allow(dead_code)] // For cancellable uploads driven by a signal handler
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)] // For cancellable uploads driven by a signal handler
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub abort: Option<AbortSignal>,
}

impl HttpRequest {
    /// Case-insensitive header lookup
    #[allow(dead_code)] // Used by transport mocks
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// DNS, refused connection, reset, timeout
    Network(String),
    /// The request's abort signal fired
    Aborted,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network failure: {}", msg),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Called with (bytes sent, bytes total) as the body is streamed
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, u64);

pub trait Transport: Send + Sync {
    /// Perform one exchange. Non-2xx statuses are responses, not errors.
    fn send(
        &self,
        request: HttpRequest,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<HttpResponse, TransportError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn send(
        &self,
        request: HttpRequest,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<HttpResponse, TransportError> {
        let mut req = self.agent.request(request.method.as_str(), &request.url);
        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }
        for (name, value) in &request.headers {
            req = req.set(name, value);
        }

        let result = match request.body {
            None => req.call(),
            Some(body) => {
                let total = body.len() as u64;
                // A fixed length keeps ureq from switching to chunked encoding
                req = req.set("Content-Length", &total.to_string());
                let reader = ProgressReader {
                    inner: Cursor::new(body),
                    sent: 0,
                    total,
                    progress,
                    abort: request.abort.clone(),
                };
                req.send(reader)
            }
        };

        let aborted = request.abort.as_ref().is_some_and(AbortSignal::is_aborted);
        match result {
            Ok(resp) => read_response(resp),
            Err(ureq::Error::Status(_, resp)) => read_response(resp),
            Err(_) if aborted => Err(TransportError::Aborted),
            Err(ureq::Error::Transport(t)) => Err(TransportError::Network(t.to_string())),
        }
    }
}

fn read_response(resp: ureq::Response) -> Result<HttpResponse, TransportError> {
    let status = resp.status();
    let status_text = resp.status_text().to_string();
    let mut body = Vec::new();
    resp.into_reader()
        .read_to_end(&mut body)
        .map_err(|e| TransportError::Network(e.to_string()))?;
    Ok(HttpResponse {
        status,
        status_text,
        body,
    })
}

/// Body reader that reports progress and honours the abort signal
struct ProgressReader<'a> {
    inner: Cursor<Vec<u8>>,
    sent: u64,
    total: u64,
    progress: Option<ProgressFn<'a>>,
    abort: Option<AbortSignal>,
}

impl Read for ProgressReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.abort.as_ref().is_some_and(AbortSignal::is_aborted) {
            return Err(io::Error::other("upload aborted"));
        }
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.sent += n as u64;
            if let Some(progress) = self.progress.as_mut() {
                progress(self.sent, self.total);
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
pub mod mock {
    //! Recording transport for pipeline tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    pub enum Reply {
        Response(HttpResponse),
        Error(TransportError),
    }

    #[derive(Default)]
    pub struct MockTransport {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<HttpRequest>>,
        /// Chunk size used to simulate progress ticks
        pub chunk: usize,
    }

    impl MockTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                chunk: 4,
                ..Self::default()
            })
        }

        pub fn respond(&self, status: u16, status_text: &str, body: &str) {
            self.replies.lock().push_back(Reply::Response(HttpResponse {
                status,
                status_text: status_text.to_string(),
                body: body.as_bytes().to_vec(),
            }));
        }

        pub fn fail(&self, error: TransportError) {
            self.replies.lock().push_back(Reply::Error(error));
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().clone()
        }

        pub fn last_request(&self) -> HttpRequest {
            self.requests
                .lock()
                .last()
                .cloned()
                .expect("no request was sent")
        }
    }

    impl Transport for MockTransport {
        fn send(
            &self,
            request: HttpRequest,
            mut progress: Option<ProgressFn<'_>>,
        ) -> Result<HttpResponse, TransportError> {
            self.requests.lock().push(request.clone());

            if let (Some(progress), Some(body)) = (progress.as_mut(), request.body.as_ref()) {
                let total = body.len() as u64;
                let mut sent = 0u64;
                for chunk in body.chunks(self.chunk.max(1)) {
                    if request.abort.as_ref().is_some_and(AbortSignal::is_aborted) {
                        return Err(TransportError::Aborted);
                    }
                    sent += chunk.len() as u64;
                    progress(sent, total);
                }
            }

            match self.replies.lock().pop_front() {
                Some(Reply::Response(resp)) => Ok(resp),
                Some(Reply::Error(e)) => Err(e),
                None => Err(TransportError::Network("no reply queued".to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reader_reports_ticks() {
        let mut ticks = Vec::new();
        let mut record = |sent: u64, total: u64| ticks.push((sent, total));
        let mut reader = ProgressReader {
            inner: Cursor::new(vec![0u8; 10]),
            sent: 0,
            total: 10,
            progress: Some(&mut record),
            abort: None,
        };
        let mut buf = [0u8; 4];
        while reader.read(&mut buf).unwrap() > 0 {}
        drop(reader);
        assert_eq!(ticks, vec![(4, 10), (8, 10), (10, 10)]);
    }

    #[test]
    fn test_progress_reader_stops_on_abort() {
        let signal = AbortSignal::new();
        let mut reader = ProgressReader {
            inner: Cursor::new(vec![0u8; 10]),
            sent: 0,
            total: 10,
            progress: None,
            abort: Some(signal.clone()),
        };
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        signal.abort();
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = HttpRequest {
            method: Method::Get,
            url: "http://x/".to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: None,
            timeout: None,
            abort: None,
        };
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert!(req.header("authorization").is_none());
    }

    #[test]
    fn test_unreachable_host_is_network_error() {
        // Port 9 on localhost is almost never listening
        let transport = UreqTransport::new(Duration::from_secs(2));
        let req = HttpRequest {
            method: Method::Get,
            url: "http://127.0.0.1:9/api/v1/auth/me".to_string(),
            headers: Vec::new(),
            body: None,
            timeout: None,
            abort: None,
        };
        assert!(matches!(
            transport.send(req, None),
            Err(TransportError::Network(_))
        ));
    }
}
