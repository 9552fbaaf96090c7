//! In-memory handler registry with path templates
//!
//! Handlers are registered per event kind under an optional path template:
//!
//! - `/chat` matches exactly `/chat`
//! - `/chat/{room}` matches `/chat/lobby` and captures `room = "lobby"`
//! - `/files/{*rest}` matches `/files/a/b.txt` and captures `rest = "a/b.txt"`
//! - no template: fallback for any path (and for connections without one)
//!
//! When several templates match, the most specific one wins: more literal
//! segments first, then fewer captures, and a catch-all tail loses to any
//! template without one.

use crate::core::events::EventKind;
use crate::core::handler::{EventHandler, HandlerMatch, HandlerRegistry};
use anyhow::{Result, bail};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
    Rest(String),
}

/// A parsed path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

/// Ordering key: higher is more specific
type Specificity = (usize, bool, std::cmp::Reverse<usize>);

impl PathTemplate {
    /// Parse a template such as `/chat/{room}`
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let parts: Vec<&str> = split_path(template).collect();

        for (index, part) in parts.iter().enumerate() {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(name) if name.starts_with('*') => {
                    if index + 1 != parts.len() {
                        bail!("Catch-all segment must be last in template '{}'", template);
                    }
                    Segment::Rest(name[1..].to_string())
                }
                Some(name) if !name.is_empty() => Segment::Capture(name.to_string()),
                Some(_) => bail!("Empty capture name in template '{}'", template),
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    /// The template as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a concrete path, returning the captured values
    pub fn matches(&self, path: &str) -> Option<IndexMap<String, String>> {
        let parts: Vec<&str> = split_path(path).collect();
        let mut params = IndexMap::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(index) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Capture(name) => {
                    let value = parts.get(index)?;
                    params.insert(name.clone(), value.to_string());
                }
                Segment::Rest(name) => {
                    params.insert(name.clone(), parts[index.min(parts.len())..].join("/"));
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }

    /// Template with capture names erased, used to detect duplicates
    fn shape(&self) -> Vec<&str> {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(literal) => literal.as_str(),
                Segment::Capture(_) => "{}",
                Segment::Rest(_) => "{*}",
            })
            .collect()
    }

    fn specificity(&self) -> Specificity {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        let has_rest = self.segments.iter().any(|s| matches!(s, Segment::Rest(_)));
        let captures = self.segments.len() - literals;
        (literals, !has_rest, std::cmp::Reverse(captures))
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

struct Route {
    template: PathTemplate,
    handler: Arc<dyn EventHandler>,
}

/// Handler registry backed by per-kind route lists
#[derive(Default)]
pub struct HandlerTable {
    routes: HashMap<EventKind, Vec<Route>>,
    fallbacks: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl HandlerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event kind under a path template
    ///
    /// Registering the same template twice for a kind replaces the handler.
    pub fn register(
        &mut self,
        kind: EventKind,
        template: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<&mut Self> {
        let template = PathTemplate::parse(template)?;
        let routes = self.routes.entry(kind).or_default();
        routes.retain(|route| route.template.shape() != template.shape());
        routes.push(Route { template, handler });
        Ok(self)
    }

    /// Register a handler used when no template matches
    pub fn register_fallback(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.fallbacks.insert(kind, handler);
        self
    }

    /// Register a `CONNECT` handler
    pub fn on_connect(&mut self, template: &str, handler: Arc<dyn EventHandler>) -> Result<&mut Self> {
        self.register(EventKind::Connect, template, handler)
    }

    /// Register a `MESSAGE` handler
    pub fn on_message(&mut self, template: &str, handler: Arc<dyn EventHandler>) -> Result<&mut Self> {
        self.register(EventKind::Message, template, handler)
    }

    /// Register an `ERROR` handler
    pub fn on_error(&mut self, template: &str, handler: Arc<dyn EventHandler>) -> Result<&mut Self> {
        self.register(EventKind::Error, template, handler)
    }

    /// Register a `CLOSE` handler
    pub fn on_close(&mut self, template: &str, handler: Arc<dyn EventHandler>) -> Result<&mut Self> {
        self.register(EventKind::Close, template, handler)
    }

    /// Number of registered templates, fallbacks included
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum::<usize>() + self.fallbacks.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HandlerRegistry for HandlerTable {
    fn find(&self, kind: EventKind, path: Option<&str>) -> Option<HandlerMatch> {
        let best = path.and_then(|path| {
            self.routes
                .get(&kind)?
                .iter()
                .filter_map(|route| route.template.matches(path).map(|params| (route, params)))
                .max_by_key(|(route, _)| route.template.specificity())
        });

        if let Some((route, params)) = best {
            tracing::trace!(kind = %kind, template = route.template.as_str(), "Handler matched");
            return Some(HandlerMatch {
                handler: route.handler.clone(),
                params,
            });
        }

        self.fallbacks.get(&kind).map(|handler| HandlerMatch {
            handler: handler.clone(),
            params: IndexMap::new(),
        })
    }
}
