//! HTTP transport used by the liveness prober.
//!
//! The prober only needs a status line, a content type and a body it can pull
//! chunk by chunk. Keeping that behind a trait lets the state machine run
//! against scripted responses in tests.

use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Error type for transport operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established (refused, DNS, TLS, connect timeout).
    #[error("connection failed: {0}")]
    Connect(String),

    /// The transport gave up waiting.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Any other request failure, including a reset mid-body.
    #[error("request failed: {0}")]
    Request(String),
}

/// Response head plus a body that has not been read yet.
#[derive(Debug)]
pub struct ProbeResponse<B> {
    pub status: u16,
    pub content_type: Option<String>,
    /// URL after redirects; relative playlist entries resolve against it.
    pub final_url: String,
    pub body: B,
}

/// Incrementally readable response body.
pub trait ResponseBody: Send {
    /// Next chunk of the body, or `None` at end of stream.
    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;
}

/// Issues streaming GET requests.
pub trait Transport: Send + Sync {
    type Body: ResponseBody;

    /// Sends the request and returns once the response head has arrived.
    fn get(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<ProbeResponse<Self::Body>, TransportError>> + Send;
}

/// `reqwest`-backed transport.
///
/// Only the connect timeout is configured on the client; header and read
/// timeouts are enforced by the prober so they apply to any transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("iptv-checker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// Body of a `reqwest` response.
#[derive(Debug)]
pub struct HttpBody(reqwest::Response);

impl ResponseBody for HttpBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.0.chunk().await?)
    }
}

impl Transport for HttpTransport {
    type Body = HttpBody;

    async fn get(&self, url: &str) -> Result<ProbeResponse<HttpBody>, TransportError> {
        let response = self.client.get(url).send().await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ProbeResponse {
            status: response.status().as_u16(),
            content_type,
            final_url: response.url().to_string(),
            body: HttpBody(response),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for exercising the prober without a network.

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// How a scripted body finishes after its chunks are consumed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum BodyEnd {
        Eof,
        Reset,
        Stall,
    }

    /// One scripted reply to a GET.
    #[derive(Debug, Clone)]
    pub enum Reply {
        Response {
            status: u16,
            content_type: Option<String>,
            chunks: Vec<Vec<u8>>,
            end: BodyEnd,
        },
        Fail(TransportError),
        /// Never produces a response head.
        Hang,
    }

    impl Reply {
        pub fn status(status: u16) -> Self {
            Reply::Response {
                status,
                content_type: None,
                chunks: Vec::new(),
                end: BodyEnd::Eof,
            }
        }

        /// A 200 `video/mp2t` reply delivering `total` bytes in 16 KiB chunks.
        pub fn mpegts(total: usize) -> Self {
            Self::body(Some("video/mp2t"), total, BodyEnd::Eof)
        }

        pub fn body(content_type: Option<&str>, total: usize, end: BodyEnd) -> Self {
            let mut chunks = Vec::new();
            let mut left = total;
            while left > 0 {
                let n = left.min(16 * 1024);
                chunks.push(vec![0x47; n]);
                left -= n;
            }
            Reply::Response {
                status: 200,
                content_type: content_type.map(str::to_string),
                chunks,
                end,
            }
        }

        pub fn text(content_type: &str, text: &str) -> Self {
            Reply::Response {
                status: 200,
                content_type: Some(content_type.to_string()),
                chunks: vec![text.as_bytes().to_vec()],
                end: BodyEnd::Eof,
            }
        }
    }

    pub struct ScriptedBody {
        chunks: VecDeque<Vec<u8>>,
        end: BodyEnd,
    }

    impl ResponseBody for ScriptedBody {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
            if let Some(chunk) = self.chunks.pop_front() {
                return Ok(Some(Bytes::from(chunk)));
            }
            match self.end {
                BodyEnd::Eof => Ok(None),
                BodyEnd::Reset => Err(TransportError::Request("connection reset".to_string())),
                BodyEnd::Stall => std::future::pending().await,
            }
        }
    }

    /// Replies are consumed per URL in order; the last one repeats.
    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        replies: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(self, url: &str, replies: Vec<Reply>) -> Self {
            self.replies
                .lock()
                .unwrap()
                .insert(url.to_string(), replies.into());
            self
        }

        /// Number of GETs issued for `url`.
        pub fn calls_to(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn next_reply(&self, url: &str) -> Reply {
            self.calls.lock().unwrap().push(url.to_string());
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue
                    .front()
                    .cloned()
                    .unwrap_or(Reply::Fail(TransportError::Connect("no reply".to_string()))),
                None => Reply::Fail(TransportError::Connect(format!("unscripted url {}", url))),
            }
        }
    }

    impl Transport for ScriptedTransport {
        type Body = ScriptedBody;

        async fn get(&self, url: &str) -> Result<ProbeResponse<ScriptedBody>, TransportError> {
            match self.next_reply(url) {
                Reply::Response {
                    status,
                    content_type,
                    chunks,
                    end,
                } => Ok(ProbeResponse {
                    status,
                    content_type,
                    final_url: url.to_string(),
                    body: ScriptedBody {
                        chunks: chunks.into(),
                        end,
                    },
                }),
                Reply::Fail(e) => Err(e),
                Reply::Hang => std::future::pending().await,
            }
        }
    }
}
