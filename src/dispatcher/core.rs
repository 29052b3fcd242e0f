use crate::api::handler::panic_message;
use crate::router::{RouteKind, Router};
use crate::server::request::HttpRequest;
use crate::services::Services;
use http::{Method, StatusCode};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// A complete HTTP answer, independent of the server that writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: u16, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            headers: Vec::new(),
            body,
        }
    }

    #[must_use]
    pub fn json(status: u16, body: Vec<u8>) -> Self {
        Self::new(status, "application/json", body)
    }

    #[must_use]
    pub fn text(status: u16, text: &str) -> Self {
        Self::new(status, "text/plain; charset=utf-8", text.as_bytes().to_vec())
    }

    #[must_use]
    pub fn redirect(location: &str) -> Self {
        Self::text(301, "Moved Permanently").with_header("Location", location)
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::text(404, "Not Found")
    }

    #[must_use]
    pub fn server_error() -> Self {
        Self::text(500, "Server Error")
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Reason phrase for the status line.
    pub fn reason(&self) -> &'static str {
        StatusCode::from_u16(self.status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown")
    }
}

/// Routes requests through the table and runs the matched behavior.
#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<Router>,
    services: Services,
}

impl Dispatcher {
    pub fn new(router: Arc<Router>, services: Services) -> Self {
        Self { router, services }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Answer one request. Never panics; unknown routes get 404.
    pub fn dispatch(&self, request: &HttpRequest) -> HttpReply {
        let start = Instant::now();

        let Ok(method) = Method::from_bytes(request.method.as_bytes()) else {
            warn!(method = %request.method, path = %request.path, "Unparseable HTTP method");
            return HttpReply::not_found();
        };

        let Some(route) = self.router.match_route(&method, &request.path) else {
            debug!(method = %method, path = %request.path, "No route matched");
            return HttpReply::not_found();
        };

        let reply = match route.kind() {
            RouteKind::Redirect { target } => HttpReply::redirect(target),
            RouteKind::Raw(handler) => {
                match catch_unwind(AssertUnwindSafe(|| handler(request))) {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(e)) => {
                        error!(
                            method = %method,
                            path = %request.path,
                            error = format!("{e:#}"),
                            "Raw handler failed"
                        );
                        HttpReply::server_error()
                    }
                    Err(panic) => {
                        error!(
                            method = %method,
                            path = %request.path,
                            panic_message = %panic_message(panic.as_ref()),
                            "Raw handler panicked"
                        );
                        HttpReply::server_error()
                    }
                }
            }
            RouteKind::Api { handler, .. } => handler(request, &self.services),
        };

        debug!(
            method = %method,
            path = %request.path,
            pattern = %route.pattern(),
            status = reply.status,
            duration_ms = start.elapsed().as_millis() as u64,
            "Request dispatched"
        );

        reply
    }
}
