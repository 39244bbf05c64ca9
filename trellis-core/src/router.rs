//! Priority router.
//!
//! Patterns are split on `/` into segments stored in a tree. A segment is
//! either static text, a named parameter (`:id`) that binds exactly one
//! non-empty path segment, or a trailing wildcard (`*`) that binds the rest
//! of the path.
//!
//! At every depth a static child is tried before the parameter child, and
//! the parameter child before the wildcard. The search backtracks, so
//! `/users/new` and `/users/:id` can coexist.
//!
//! Matching always runs against the raw request path. An escaped separator
//! such as `%2F` therefore stays inside its segment.
//!
//! ```text
//! GET /users/new           -> static
//! GET /users/:id           -> /users/42        id = "42"
//! GET /files/*             -> /files/a/b.txt   * = "a/b.txt"
//! ```

use crate::config::DuplicateRoutePolicy;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{Handler, method_not_allowed_handler, not_found_handler};
use http::Method;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// A registered (method, path) binding, as exposed for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
    pub name: String,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<7} {} ({})", self.method.as_str(), self.path, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Wildcard,
}

#[derive(Clone)]
struct Endpoint {
    handler: Handler,
    pattern: Arc<str>,
    param_names: Arc<[String]>,
    route_index: usize,
}

#[derive(Clone, Default)]
struct Node {
    statics: HashMap<String, Node>,
    param: Option<Box<Node>>,
    wildcard: Option<Box<Node>>,
    endpoints: Vec<(Method, Endpoint)>,
}

impl Node {
    fn endpoint(&self, method: &Method) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, e)| e)
    }
}

#[derive(Clone)]
struct RouteEntry {
    route: Route,
    handler: Handler,
}

/// Outcome of a lookup, without touching a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found {
        pattern: String,
        names: Vec<String>,
        values: Vec<String>,
    },
    MethodNotAllowed,
    NotFound,
}

/// Route table plus the matching tree built from it.
///
/// Registration takes `&mut self`; lookups take `&self` and may run
/// concurrently once registration is over.
#[derive(Clone, Default)]
pub struct Router {
    root: Node,
    routes: Vec<RouteEntry>,
    policy: DuplicateRoutePolicy,
}

impl Router {
    pub fn new(policy: DuplicateRoutePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> DuplicateRoutePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: DuplicateRoutePolicy) {
        self.policy = policy;
    }

    /// Register `handler` for `method` and `path`.
    pub fn add(&mut self, method: Method, path: &str, handler: Handler) -> Result<Route> {
        self.insert(method, path, handler.clone(), handler)
    }

    /// Register `chain` as the dispatch target while recording `handler`
    /// (the unwrapped one) in the route table for naming and reversal.
    pub(crate) fn insert(
        &mut self,
        method: Method,
        path: &str,
        chain: Handler,
        handler: Handler,
    ) -> Result<Route> {
        let (pattern, segments) = parse_pattern(path)?;
        let param_names: Vec<String> = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Static(_) => None,
                Segment::Param(name) => Some(name.clone()),
                Segment::Wildcard => Some("*".to_string()),
            })
            .collect();
        let name = handler
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} {}", method, pattern));
        let route = Route {
            method: method.clone(),
            path: pattern.clone(),
            name,
        };

        let mut node = &mut self.root;
        for segment in &segments {
            node = match segment {
                Segment::Static(text) => node.statics.entry(text.clone()).or_default(),
                Segment::Param(_) => node.param.get_or_insert_with(Box::default).as_mut(),
                Segment::Wildcard => node.wildcard.get_or_insert_with(Box::default).as_mut(),
            };
        }

        let mut endpoint = Endpoint {
            handler: chain,
            pattern: Arc::from(pattern.as_str()),
            param_names: param_names.into(),
            route_index: self.routes.len(),
        };
        let entry = RouteEntry {
            route: route.clone(),
            handler,
        };

        match node.endpoints.iter_mut().find(|(m, _)| *m == method) {
            Some((_, existing)) => match self.policy {
                DuplicateRoutePolicy::Reject => {
                    return Err(Error::DuplicateRoute {
                        method,
                        path: pattern,
                    });
                }
                DuplicateRoutePolicy::Replace => {
                    warn!(
                        method = %method,
                        path = %pattern,
                        previous = %existing.pattern,
                        "Replacing previously registered route"
                    );
                    endpoint.route_index = existing.route_index;
                    self.routes[existing.route_index] = entry;
                    *existing = endpoint;
                }
            },
            None => {
                node.endpoints.push((method, endpoint));
                self.routes.push(entry);
            }
        }

        Ok(route)
    }

    /// True if registering `method` + `path` would collide with an
    /// existing route. Invalid patterns never collide.
    pub fn contains(&self, method: &Method, path: &str) -> bool {
        let Ok((_, segments)) = parse_pattern(path) else {
            return false;
        };
        let mut node = &self.root;
        for segment in &segments {
            let next = match segment {
                Segment::Static(text) => node.statics.get(text),
                Segment::Param(_) => node.param.as_deref(),
                Segment::Wildcard => node.wildcard.as_deref(),
            };
            match next {
                Some(n) => node = n,
                None => return false,
            }
        }
        node.endpoint(method).is_some()
    }

    /// Resolve `path` for `method` and record the result in the context.
    ///
    /// On success the context receives the matched pattern, parameter names
    /// and values and the route's handler. Otherwise the handler is set to
    /// the not-found or method-not-allowed sentinel.
    pub fn find(&self, method: &Method, path: &str, c: &mut Context) {
        let mut values = std::mem::take(&mut c.pvalues);
        values.clear();
        c.pnames.clear();
        c.path.clear();

        let mut path_matched = false;
        match self.lookup(method, path, &mut values, &mut path_matched) {
            Some(endpoint) => {
                c.path.push_str(&endpoint.pattern);
                c.pnames.extend(endpoint.param_names.iter().cloned());
                c.handler = endpoint.handler.clone();
            }
            None => {
                values.clear();
                c.handler = if path_matched {
                    method_not_allowed_handler()
                } else {
                    not_found_handler()
                };
            }
        }
        c.pvalues = values;
    }

    /// Resolve without a context.
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution {
        let mut values = Vec::new();
        let mut path_matched = false;
        match self.lookup(method, path, &mut values, &mut path_matched) {
            Some(endpoint) => Resolution::Found {
                pattern: endpoint.pattern.to_string(),
                names: endpoint.param_names.to_vec(),
                values,
            },
            None if path_matched => Resolution::MethodNotAllowed,
            None => Resolution::NotFound,
        }
    }

    fn lookup(
        &self,
        method: &Method,
        path: &str,
        values: &mut Vec<String>,
        path_matched: &mut bool,
    ) -> Option<&Endpoint> {
        let rest = path.strip_prefix('/').unwrap_or(path);
        descend(&self.root, Some(rest), method, values, path_matched)
    }

    /// Routes in registration order.
    pub fn routes(&self) -> Vec<Route> {
        self.routes.iter().map(|e| e.route.clone()).collect()
    }

    /// Routes sorted by path, then method.
    pub fn sorted_routes(&self) -> Vec<Route> {
        let mut routes = self.routes();
        routes.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| a.method.as_str().cmp(b.method.as_str()))
        });
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Build a path for the route named `name`, substituting `params` in
    /// order for each `:param` or `*` segment.
    pub fn reverse(&self, name: &str, params: &[&str]) -> Option<String> {
        self.routes
            .iter()
            .find(|e| e.route.name == name)
            .map(|e| reverse_path(&e.route.path, params))
    }

    /// Like [`Router::reverse`], looking the route up by handler identity.
    pub fn uri(&self, handler: &Handler, params: &[&str]) -> Option<String> {
        self.routes
            .iter()
            .find(|e| e.handler.same_as(handler))
            .map(|e| reverse_path(&e.route.path, params))
    }
}

fn descend<'n>(
    node: &'n Node,
    rest: Option<&str>,
    method: &Method,
    values: &mut Vec<String>,
    path_matched: &mut bool,
) -> Option<&'n Endpoint> {
    let Some(rest) = rest else {
        if node.endpoints.is_empty() {
            return None;
        }
        let found = node.endpoint(method);
        if found.is_none() {
            *path_matched = true;
        }
        return found;
    };

    let (segment, next) = match rest.find('/') {
        Some(i) => (&rest[..i], Some(&rest[i + 1..])),
        None => (rest, None),
    };

    if let Some(child) = node.statics.get(segment) {
        if let Some(found) = descend(child, next, method, values, path_matched) {
            return Some(found);
        }
    }

    if !segment.is_empty() {
        if let Some(child) = node.param.as_deref() {
            values.push(segment.to_string());
            if let Some(found) = descend(child, next, method, values, path_matched) {
                return Some(found);
            }
            values.pop();
        }
    }

    if let Some(child) = node.wildcard.as_deref() {
        if !child.endpoints.is_empty() {
            match child.endpoint(method) {
                Some(found) => {
                    values.push(rest.to_string());
                    return Some(found);
                }
                None => *path_matched = true,
            }
        }
    }

    None
}

fn parse_pattern(path: &str) -> Result<(String, Vec<Segment>)> {
    let pattern = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    let raw: Vec<&str> = pattern[1..].split('/').collect();
    let last = raw.len() - 1;
    let mut segments = Vec::with_capacity(raw.len());

    for (i, text) in raw.iter().enumerate() {
        let segment = if *text == "*" {
            if i != last {
                return Err(Error::InvalidRoute {
                    path: pattern,
                    reason: "wildcard must be the last segment",
                });
            }
            Segment::Wildcard
        } else if let Some(name) = text.strip_prefix(':') {
            if name.is_empty() {
                return Err(Error::InvalidRoute {
                    path: pattern,
                    reason: "parameter name is empty",
                });
            }
            Segment::Param(name.to_string())
        } else if text.contains('*') {
            return Err(Error::InvalidRoute {
                path: pattern,
                reason: "wildcard must be a whole segment",
            });
        } else {
            Segment::Static(text.to_string())
        };
        segments.push(segment);
    }

    Ok((pattern, segments))
}

fn reverse_path(pattern: &str, params: &[&str]) -> String {
    let mut values = params.iter();
    let mut uri = String::with_capacity(pattern.len());
    for (i, segment) in pattern.split('/').enumerate() {
        if i > 0 {
            uri.push('/');
        }
        let dynamic = segment == "*" || segment.starts_with(':');
        let value = if dynamic { values.next() } else { None };
        match value {
            Some(value) => uri.push_str(value),
            None => uri.push_str(segment),
        }
    }
    uri
}
