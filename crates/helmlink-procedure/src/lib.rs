//! Procedure composition and routing for Helmlink.
//!
//! This crate is the typed-RPC half of the core:
//!
//! - **Parser adapter** ([`parser_for`]) — wraps serde deserialization
//!   into a uniform parse-or-fail function with per-field errors.
//! - **Builder** ([`ProcedureBuilder`]) — composes input validation,
//!   custom middlewares, and filters in front of an async resolver,
//!   with structural sharing so partial chains are reusable.
//! - **Procedure** ([`Procedure`]) — the frozen, immutable, callable
//!   result of a builder.
//! - **Router** ([`Router`]) — flattens a tree of named procedures and
//!   sub-routers into one dotted-path map, failing fast on collisions.
//!
//! # The skip outcome
//!
//! A call resolves to one of three things: a value, an error, or
//! [`Resolved::Skip`] — "this client is not entitled to this update."
//! Skip is the filter mechanism for publish fan-out: it is never logged
//! and never produces a wire frame, which is how an authorization-scoped
//! no-op stays distinct from a reportable failure.
//!
//! # How it fits in the stack
//!
//! ```text
//! Session (above)  ← dispatches wire requests through Router::call
//!     ↕
//! Procedure layer (this crate)  ← validation, middleware, resolvers
//!     ↕
//! Domain code (below)  ← supplies the procedure tree at startup
//! ```

mod builder;
mod error;
mod parser;
mod procedure;
mod router;

pub use builder::ProcedureBuilder;
pub use error::{FieldErrors, ProcedureError};
pub use parser::{ParseFn, parser_for};
pub use procedure::{
    CallContext, Middleware, Procedure, ProcedureKind, Resolved, Resolver,
    Step,
};
pub use router::{Router, RouterNode};
