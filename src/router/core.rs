use crate::api::{wrap_api_handler, ApiError, ApiHandlerFn, ApiRequest};
use crate::dispatcher::HttpReply;
use crate::server::request::HttpRequest;
use arc_swap::ArcSwap;
use http::Method;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A handler that builds its own reply.
pub type RawHandler = Arc<dyn Fn(&HttpRequest) -> anyhow::Result<HttpReply> + Send + Sync>;

/// What a matched route does.
#[derive(Clone)]
pub enum RouteKind {
    /// Answer 301 with a `Location` header.
    Redirect { target: String },
    Raw(RawHandler),
    Api {
        handler: ApiHandlerFn,
        description: String,
    },
}

/// One entry of the route table.
#[derive(Clone)]
pub struct Route {
    method: Method,
    pattern: String,
    regex: Regex,
    kind: RouteKind,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            RouteKind::Redirect { .. } => "redirect",
            RouteKind::Raw(_) => "raw",
            RouteKind::Api { .. } => "api",
        };
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("kind", &kind)
            .finish()
    }
}

/// `pattern` must match the whole path.
fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

impl Route {
    pub fn redirect(
        method: Method,
        pattern: &str,
        target: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            method,
            pattern: pattern.to_string(),
            regex: anchored(pattern)?,
            kind: RouteKind::Redirect {
                target: target.into(),
            },
        })
    }

    pub fn raw<F>(method: Method, pattern: &str, handler: F) -> Result<Self, regex::Error>
    where
        F: Fn(&HttpRequest) -> anyhow::Result<HttpReply> + Send + Sync + 'static,
    {
        Ok(Self {
            method,
            pattern: pattern.to_string(),
            regex: anchored(pattern)?,
            kind: RouteKind::Raw(Arc::new(handler)),
        })
    }

    /// A POST endpoint. `path` is matched literally and doubles as the endpoint name.
    pub fn api<R, T, F>(
        path: &str,
        description: impl Into<String>,
        handler: F,
    ) -> Result<Self, regex::Error>
    where
        R: ApiRequest,
        T: Serialize,
        F: Fn(&mut R) -> Result<T, ApiError> + Send + Sync + 'static,
    {
        Ok(Self {
            method: Method::POST,
            pattern: path.to_string(),
            regex: anchored(&regex::escape(path))?,
            kind: RouteKind::Api {
                handler: wrap_api_handler(path, handler),
                description: description.into(),
            },
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn kind(&self) -> &RouteKind {
        &self.kind
    }

    #[inline]
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method == *method && self.regex.is_match(path)
    }
}

/// An API endpoint and what it does.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescription {
    pub endpoint: String,
    pub description: String,
}

pub(crate) type RouteTable = ArcSwap<Vec<Arc<Route>>>;

/// Ordered route table. Reads are lock-free; the first matching route wins.
pub struct Router {
    table: Arc<RouteTable>,
}

impl Router {
    #[must_use]
    pub fn new(routes: Vec<Route>) -> Self {
        info!(routes_count = routes.len(), "Routing table loaded");
        for route in &routes {
            debug!(method = %route.method, pattern = %route.pattern, "Route registered");
        }

        Self {
            table: Arc::new(ArcSwap::from_pointee(
                routes.into_iter().map(Arc::new).collect(),
            )),
        }
    }

    /// The given routes followed by the core endpoints (`describe`).
    pub fn with_core_routes(routes: Vec<Route>) -> Result<Self, regex::Error> {
        let router = Self::new(routes);
        router.append(super::describe::route(Arc::downgrade(&router.table))?);
        Ok(router)
    }

    /// Add a route at the end of the table.
    #[doc(hidden)]
    pub fn append(&self, route: Route) {
        let route = Arc::new(route);
        self.table.rcu(|routes| {
            let mut routes = Vec::clone(routes);
            routes.push(Arc::clone(&route));
            routes
        });
    }

    #[inline]
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<Arc<Route>> {
        self.table
            .load()
            .iter()
            .find(|route| route.matches(method, path))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every API endpoint in table order.
    #[must_use]
    pub fn describe(&self) -> Vec<EndpointDescription> {
        describe_table(&self.table)
    }
}

pub(crate) fn describe_table(table: &RouteTable) -> Vec<EndpointDescription> {
    table
        .load()
        .iter()
        .filter_map(|route| match &route.kind {
            RouteKind::Api { description, .. } => Some(EndpointDescription {
                endpoint: route.pattern.clone(),
                description: description.clone(),
            }),
            _ => None,
        })
        .collect()
}
