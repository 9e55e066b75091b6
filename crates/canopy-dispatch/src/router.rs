//! Request routing.
//!
//! Routes are registered once at startup and matched in registration order;
//! the first route whose method and path template match wins. After startup
//! the table is read-only, so concurrent lookups from many scheduler tasks
//! need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;

use canopy_core::Action;

use crate::handler::HandlerDescriptor;

/// Parameter names used internally by routing and negotiation, stripped
/// from the argument set handed to handlers.
const RESERVED_PARAMS: [&str; 3] = ["action", "controller", "format"];

/// A segment of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    /// A literal segment (e.g. `clusters`).
    Literal(String),
    /// A parameter segment (e.g. `{cluster_id}`).
    Param(String),
}

/// A registered route.
#[derive(Clone)]
struct Route {
    method: Method,
    segments: Vec<PathSegment>,
    pattern: String,
    action: Action,
    descriptor: Arc<HandlerDescriptor>,
}

impl Route {
    fn new(
        method: Method,
        pattern: &str,
        action: Action,
        descriptor: Arc<HandlerDescriptor>,
    ) -> Self {
        Self {
            method,
            segments: parse_segments(pattern),
            pattern: pattern.to_string(),
            action,
            descriptor,
        }
    }

    /// Attempts to match this route against a path, returning extracted
    /// parameters on success.
    fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if path_segments.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, actual) in self.segments.iter().zip(path_segments.iter()) {
            match segment {
                PathSegment::Literal(expected) => {
                    if expected != actual {
                        return None;
                    }
                }
                PathSegment::Param(name) => {
                    if !RESERVED_PARAMS.contains(&name.as_str()) {
                        params.insert(name.clone(), (*actual).to_string());
                    }
                }
            }
        }
        Some(params)
    }
}

fn parse_segments(pattern: &str) -> Vec<PathSegment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.starts_with('{') && s.ends_with('}') {
                PathSegment::Param(s[1..s.len() - 1].to_string())
            } else {
                PathSegment::Literal(s.to_string())
            }
        })
        .collect()
}

/// A matched route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    action: Action,
    params: HashMap<String, String>,
    pattern: String,
    descriptor: Arc<HandlerDescriptor>,
}

impl RouteMatch {
    /// Returns the action bound to the route.
    #[must_use]
    pub const fn action(&self) -> Action {
        self.action
    }

    /// Returns the extracted path parameters, reserved keys removed.
    #[must_use]
    pub const fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Returns a specific path parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns the matched path template, for logging.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the handler descriptor bound to the route.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<HandlerDescriptor> {
        &self.descriptor
    }
}

/// Ordered request router.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use canopy_core::{Action, RequestContext};
/// use canopy_dispatch::{
///     ActionArgs, ActionOutcome, BoxedActionFuture, Controller, HandlerDescriptor, Router,
/// };
/// use http::Method;
///
/// struct Clusters;
/// impl Controller for Clusters {
///     fn default_action<'a>(
///         &'a self,
///         _action: Action,
///         _ctx: &'a RequestContext,
///         _args: ActionArgs,
///     ) -> BoxedActionFuture<'a> {
///         Box::pin(async { ActionOutcome::json(serde_json::json!({})) })
///     }
/// }
///
/// let descriptor = Arc::new(HandlerDescriptor::new(Arc::new(Clusters)));
/// let mut router = Router::new();
/// router.register(Method::GET, "/clusters/{cluster_id}", Action::Show, descriptor);
///
/// let matched = router.match_route(&Method::GET, "/clusters/c-1").unwrap();
/// assert_eq!(matched.action(), Action::Show);
/// assert_eq!(matched.param("cluster_id"), Some("c-1"));
/// ```
#[derive(Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers a route.
    ///
    /// Registration order is significant: the first matching route wins.
    pub fn register(
        &mut self,
        method: Method,
        pattern: impl AsRef<str>,
        action: Action,
        descriptor: Arc<HandlerDescriptor>,
    ) {
        self.routes
            .push(Route::new(method, pattern.as_ref(), action, descriptor));
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Matches a request against the registered routes.
    ///
    /// Returns `None` when no route matches; callers turn that into the
    /// standard not-found response.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        for route in &self.routes {
            if route.method == *method {
                if let Some(params) = route.match_path(path) {
                    return Some(RouteMatch {
                        action: route.action,
                        params,
                        pattern: route.pattern.clone(),
                        descriptor: Arc::clone(&route.descriptor),
                    });
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .finish()
    }
}
