//! The matcher chain.
//!
//! A [`Router`] tests its [`Matcher`]s top to bottom against the exchange's resource path. A
//! matching matcher narrows the path segments to what lies below its pattern, runs its handler
//! and restores the segments afterwards. Routing goes on with the following matchers unless the
//! matcher stops on match. When nothing matched the not-found handler answers.

use std::sync::Arc;

use async_trait::async_trait;
use loom_http::connection::Exchange;
use loom_http::handler::{Handler, HandlerError};
use tracing::trace;

use crate::handlers::NotFoundHandler;
use crate::pattern::PathPattern;

pub struct Matcher {
    pattern: PathPattern,
    handler: Arc<dyn Handler>,
    stop_on_match: bool,
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher").field("pattern", &self.pattern).field("stop_on_match", &self.stop_on_match).finish_non_exhaustive()
    }
}

impl Matcher {
    pub fn new(pattern: PathPattern, handler: Arc<dyn Handler>, stop_on_match: bool) -> Self {
        Self { pattern, handler, stop_on_match }
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn stop_on_match(&self) -> bool {
        self.stop_on_match
    }
}

pub struct Router {
    matchers: Vec<Matcher>,
    not_found: Arc<dyn Handler>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("matchers", &self.matchers).finish_non_exhaustive()
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }
}

#[async_trait]
impl Handler for Router {
    async fn handle(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        let mut matched = false;

        for matcher in &self.matchers {
            let outer = exchange.segments().clone();
            let Some(scoped) = matcher.pattern.matches(&outer.resource).and_then(|len| outer.descend(len)) else {
                continue;
            };

            trace!(pattern = %matcher.pattern, component = %scoped.component, resource = %scoped.resource, "matched");
            matched = true;
            exchange.set_segments(scoped);
            let result = matcher.handler.handle(exchange).await;
            exchange.set_segments(outer);
            result?;

            if matcher.stop_on_match {
                return Ok(());
            }
        }

        if !matched {
            trace!(path = exchange.resource_path(), "no matcher matched");
            self.not_found.handle(exchange).await?;
        }
        Ok(())
    }
}

pub struct RouterBuilder {
    matchers: Vec<Matcher>,
    not_found: Arc<dyn Handler>,
}

impl std::fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterBuilder").field("matchers", &self.matchers).finish_non_exhaustive()
    }
}

impl RouterBuilder {
    fn new() -> Self {
        Self { matchers: Vec::new(), not_found: Arc::new(NotFoundHandler) }
    }

    /// Appends a matcher that ends routing when it matches.
    #[must_use]
    pub fn route(mut self, pattern: PathPattern, handler: impl Handler + 'static) -> Self {
        self.matchers.push(Matcher::new(pattern, Arc::new(handler), true));
        self
    }

    /// Appends a matcher after which routing goes on.
    #[must_use]
    pub fn chain(mut self, pattern: PathPattern, handler: impl Handler + 'static) -> Self {
        self.matchers.push(Matcher::new(pattern, Arc::new(handler), false));
        self
    }

    #[must_use]
    pub fn matcher(mut self, matcher: Matcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    #[must_use]
    pub fn not_found(mut self, handler: impl Handler + 'static) -> Self {
        self.not_found = Arc::new(handler);
        self
    }

    pub fn build(self) -> Router {
        Router { matchers: self.matchers, not_found: self.not_found }
    }
}
