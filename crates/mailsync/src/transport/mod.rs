//! Rate-limited transport
//!
//! Every remote call goes through [`Transport::call`], which:
//! - paces requests proactively against the API's rolling limits
//! - retries throttled calls with exponential, jittered backoff
//! - surfaces a 403 on a cold start as an authorization failure, unretried
//! - retries network failures and 5xx a few times with a fixed delay
//!
//! The call history lives in one `Transport` instance, so a fresh transport
//! per run starts with no assumptions about the account.

mod clock;
mod http;
mod rate;
mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use http::UreqBackend;
pub use rate::{CallHistory, ForbiddenClass, RateLimits, THROTTLE_HINT};
pub use retry::RetryPolicy;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::fmt;

use crate::error::SyncError;

/// HTTP method of a [`Request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Writes count against the write budget
    pub fn is_write(self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

/// Outbound request, relative to the backend's base URL
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// Form-encoded body for POST and PUT
    pub form: Option<Vec<(String, String)>>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            form: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn post(path: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self::new(Method::Post, path).with_form(form)
    }

    pub fn put(path: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self::new(Method::Put, path).with_form(form)
    }

    pub fn with_form(mut self, form: Vec<(String, String)>) -> Self {
        self.form = Some(form);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Status and body of a completed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Failure below HTTP: connection refused, timeout, unreadable body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// Sends a single request with no retries
pub trait HttpBackend {
    fn send(&self, request: &Request) -> Result<Response, BackendError>;
}

/// Adds per-attempt headers, such as a timestamped signature
pub trait RequestSigner {
    fn headers(&self) -> Vec<(String, String)>;
}

/// Retrying, pacing wrapper around an [`HttpBackend`]
pub struct Transport {
    backend: Box<dyn HttpBackend>,
    clock: Box<dyn Clock>,
    signer: Option<Box<dyn RequestSigner>>,
    history: CallHistory,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(
        backend: Box<dyn HttpBackend>,
        clock: Box<dyn Clock>,
        limits: RateLimits,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            clock,
            signer: None,
            history: CallHistory::new(limits),
            policy,
        }
    }

    pub fn with_signer(mut self, signer: Box<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn history(&self) -> &CallHistory {
        &self.history
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Issue a request, retrying as the policy allows
    ///
    /// Returns the response for 2xx and 404; 404 is left to the caller.
    ///
    /// # Errors
    /// `Unauthorized` for a 403 the history cannot explain as throttling;
    /// `RateLimited` when throttling outlasts the retry bound;
    /// `Transport` when network failures or 5xx outlast their bound;
    /// `Rejected` for any other status.
    pub fn call(&mut self, request: &Request) -> Result<Response, SyncError> {
        let write = request.method.is_write();
        let mut throttle_attempts = 0u32;
        let mut transport_attempts = 0u32;

        loop {
            self.pace(write);
            self.history.record_call(write, self.clock.now());

            let signed = self.sign(request);
            debug!("{} {}", request.method, request.path);

            let failure = match self.backend.send(&signed) {
                Ok(response) if response.is_success() || response.is_not_found() => {
                    self.history.record_success();
                    return Ok(response);
                }
                Ok(response) if response.status == 403 => {
                    let now = self.clock.now();
                    match self.history.classify_forbidden(&response.body, now) {
                        ForbiddenClass::Unauthorized => {
                            return Err(SyncError::Unauthorized(format!(
                                "{} {} returned 403: {}",
                                request.method,
                                request.path,
                                response.body.trim()
                            )));
                        }
                        ForbiddenClass::Throttled => {
                            throttle_attempts += 1;
                            if throttle_attempts >= self.policy.max_attempts {
                                return Err(SyncError::RateLimited {
                                    attempts: throttle_attempts,
                                });
                            }
                            let delay = self.policy.throttle_delay(throttle_attempts);
                            warn!(
                                "Throttled on {} {} (attempt {}/{}), backing off {:?}",
                                request.method,
                                request.path,
                                throttle_attempts,
                                self.policy.max_attempts,
                                delay
                            );
                            self.clock.sleep(delay);
                            continue;
                        }
                    }
                }
                Ok(response) if response.status >= 500 => {
                    format!("server returned {}", response.status)
                }
                Ok(response) => {
                    return Err(SyncError::Rejected {
                        status: response.status,
                        body: response.body,
                    });
                }
                Err(e) => e.to_string(),
            };

            transport_attempts += 1;
            self.transport_backoff(request, transport_attempts, failure)?;
        }
    }

    /// Issue a read and decode its JSON body
    ///
    /// Returns `Ok(None)` when the resource does not exist. Bodies that do
    /// not decode are retried like any other transport failure.
    pub fn call_json<T: DeserializeOwned>(&mut self, request: &Request) -> Result<Option<T>, SyncError> {
        let mut attempts = 0u32;
        loop {
            let response = self.call(request)?;
            if response.is_not_found() {
                return Ok(None);
            }

            match serde_json::from_str::<T>(&response.body) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    attempts += 1;
                    self.transport_backoff(request, attempts, format!("malformed response: {}", e))?;
                }
            }
        }
    }

    fn transport_backoff(&mut self, request: &Request, attempts: u32, message: String) -> Result<(), SyncError> {
        if attempts >= self.policy.transport_attempts {
            return Err(SyncError::Transport { attempts, message });
        }
        warn!(
            "{} {} failed (attempt {}/{}): {}",
            request.method, request.path, attempts, self.policy.transport_attempts, message
        );
        self.clock.sleep(self.policy.transport_delay);
        Ok(())
    }

    fn pace(&mut self, write: bool) {
        while let Some(wait) = self.history.delay_before(write, self.clock.now()) {
            debug!("Pacing {} request for {:?}", if write { "write" } else { "read" }, wait);
            self.clock.sleep(wait);
        }
    }

    fn sign(&self, request: &Request) -> Request {
        let mut signed = request.clone();
        if let Some(signer) = &self.signer {
            signed.headers.extend(signer.headers());
        }
        signed
    }
}
