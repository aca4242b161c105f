//! Request routing for `loom-http`.
//!
//! A [`Router`] is an ordered chain of [`Matcher`]s, each pairing a [`PathPattern`] with a
//! handler. Routers are handlers themselves, so they nest: a router mounted under `/dav`
//! dispatches on the path below `/dav`.
//!
//! ```
//! use http::StatusCode;
//! use loom_web::{NotFoundHandler, PathPattern, Router, StatusHandler};
//!
//! let router = Router::builder()
//!     .route(PathPattern::exact("/health"), StatusHandler::new(StatusCode::OK))
//!     .route(PathPattern::prefix("/gone"), StatusHandler::new(StatusCode::GONE))
//!     .not_found(NotFoundHandler)
//!     .build();
//! assert_eq!(router.matchers().len(), 2);
//! ```

mod handlers;
mod pattern;
mod router;

pub use handlers::{FnHandler, ForwardHandler, NotFoundHandler, StatusHandler, handler_fn};
pub use loom_http::handler::DefaultErrorHandler;
pub use pattern::PathPattern;
pub use router::{Matcher, Router, RouterBuilder};
