//! Auxiliary route table.
//!
//! Routes are matched either by literal path or by regular expression.
//! Literal routes live in one radix tree per method, so a literal lookup is
//! O(path-length). Pattern routes are kept in registration order and scanned
//! linearly; there are only ever a handful of them.
//!
//! Resolution order for a given method and path:
//!
//! 1. a literal route equal to the path, first-registered wins;
//! 2. otherwise the pattern whose match, anchored at the start of the path,
//!    is longest; ties go to the earlier registration.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::{InsertError, Router as MatchitRouter};
use regex::Regex;

use crate::handler::{BoxedHandler, Handler};

/// How a route selects paths.
#[derive(Clone, Debug)]
pub enum Matcher {
    /// Exact string equality with the path.
    Literal(String),
    /// Regex that must match starting at offset 0 of the path.
    Pattern(Regex),
}

impl From<&str> for Matcher {
    fn from(path: &str) -> Self { Self::Literal(path.to_owned()) }
}

impl From<String> for Matcher {
    fn from(path: String) -> Self { Self::Literal(path) }
}

impl From<Regex> for Matcher {
    fn from(re: Regex) -> Self { Self::Pattern(re) }
}

struct PatternRoute {
    method: Method,
    pattern: Regex,
    handler: BoxedHandler,
}

/// Ordered collection of auxiliary route handlers.
///
/// Built once before the server starts and read-only afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    literals: HashMap<Method, MatchitRouter<BoxedHandler>>,
    patterns: Vec<PatternRoute>,
}

/// A resolved route: the handler plus any named captures of its pattern.
pub(crate) struct Resolved {
    pub handler: BoxedHandler,
    pub params: HashMap<String, String>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route.
    pub fn register(&mut self, method: Method, matcher: impl Into<Matcher>, handler: impl Handler) {
        let handler = handler.into_boxed_handler();
        match matcher.into() {
            Matcher::Literal(path) => {
                let tree = self.literals.entry(method).or_default();
                match tree.insert(escape_literal(&path), handler) {
                    // Same literal registered twice: the first one keeps winning.
                    Ok(()) | Err(InsertError::Conflict { .. }) => {}
                    Err(e) => panic!("invalid route `{path}`: {e}"),
                }
            }
            Matcher::Pattern(pattern) => self.patterns.push(PatternRoute { method, pattern, handler }),
        }
    }

    pub(crate) fn resolve(&self, method: &Method, path: &str) -> Option<Resolved> {
        if let Some(matched) = self.literals.get(method).and_then(|tree| tree.at(path).ok()) {
            return Some(Resolved { handler: Arc::clone(matched.value), params: HashMap::new() });
        }

        let mut best: Option<(&PatternRoute, usize)> = None;
        for route in self.patterns.iter().filter(|r| r.method == *method) {
            let Some(m) = route.pattern.find(path) else { continue };
            if m.start() != 0 {
                continue;
            }
            // Strictly longer only, so earlier registrations win ties.
            if best.is_none_or(|(_, len)| m.len() > len) {
                best = Some((route, m.len()));
            }
        }

        let (route, _) = best?;
        let params = route.pattern.captures(path)
            .map(|caps| {
                route.pattern.capture_names()
                    .flatten()
                    .filter_map(|name| caps.name(name).map(|v| (name.to_owned(), v.as_str().to_owned())))
                    .collect()
            })
            .unwrap_or_default();
        Some(Resolved { handler: Arc::clone(&route.handler), params })
    }
}

/// matchit treats `{` and `}` in route definitions as parameter syntax;
/// doubling them makes the route a plain literal. Lookups take the raw path.
fn escape_literal(path: &str) -> String {
    path.replace('{', "{{").replace('}', "}}")
}
