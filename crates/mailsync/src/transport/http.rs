//! Blocking HTTP backend over ureq
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic. Status codes are
//! returned as data rather than errors so the transport can classify them.

use std::time::Duration;

use ureq::{Agent, RequestBuilder};

use super::{BackendError, HttpBackend, Method, Request, Response};

/// [`HttpBackend`] that sends requests to a fixed base URL
pub struct UreqBackend {
    agent: Agent,
    base_url: String,
}

impl UreqBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();

        Self {
            agent: config.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn decorate<B>(mut builder: RequestBuilder<B>, request: &Request) -> RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    for (key, value) in &request.query {
        builder = builder.query(key, value);
    }
    builder
}

impl HttpBackend for UreqBackend {
    fn send(&self, request: &Request) -> Result<Response, BackendError> {
        let url = self.url(&request.path);
        let form = request.form.as_deref().unwrap_or_default();

        let result = match request.method {
            Method::Get => decorate(self.agent.get(&url), request).call(),
            Method::Delete => decorate(self.agent.delete(&url), request).call(),
            Method::Post => decorate(self.agent.post(&url), request)
                .send_form(form.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            Method::Put => decorate(self.agent.put(&url), request)
                .send_form(form.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
        };

        let mut response = result.map_err(|e| BackendError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| BackendError(format!("failed to read response body: {}", e)))?;

        Ok(Response { status, body })
    }
}
