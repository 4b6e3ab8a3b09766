//! The callable procedure: a frozen middleware chain plus a resolver.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::{ParseFn, ProcedureError};

// ---------------------------------------------------------------------------
// ProcedureKind
// ---------------------------------------------------------------------------

/// The three procedure flavors. Every procedure has exactly one.
///
/// - `Request` — a server-computed view; live-queryable over the socket.
/// - `Send` — a mutation; fire-and-forget from the client's perspective.
/// - `DataStream` — produces the flat entity list for the snapshot
///   channel when a stream is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcedureKind {
    Request,
    Send,
    DataStream,
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Send => write!(f, "send"),
            Self::DataStream => write!(f, "dataStream"),
        }
    }
}

// ---------------------------------------------------------------------------
// CallContext
// ---------------------------------------------------------------------------

/// Everything a single procedure call can see.
///
/// Middlewares rewrite `ctx` and `input` in place before the resolver
/// runs — the Rust rendition of a middleware chain where each stage may
/// pass overrides to the next.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// The caller's context object (client identity, station, …).
    /// Always a JSON object; middlewares may merge keys into it.
    pub ctx: Value,

    /// The call input. Starts as the raw client params; each input
    /// parser replaces it with the normalized parse result.
    pub input: Value,

    /// The publish payload when this call is a re-evaluation triggered
    /// by a mutation. `None` on a direct client fetch — filters pass in
    /// that case, so first paint is never filtered away.
    pub trigger: Option<Arc<Value>>,
}

impl CallContext {
    /// A context for a direct client call.
    pub fn new(ctx: Value, input: Value) -> Self {
        Self {
            ctx,
            input,
            trigger: None,
        }
    }

    /// The same call re-triggered by a publish payload.
    pub fn with_trigger(mut self, payload: Arc<Value>) -> Self {
        self.trigger = Some(payload);
        self
    }

    /// Merges the keys of `patch` (a JSON object) into `ctx`.
    /// Non-object patches replace `ctx` wholesale.
    pub fn merge_ctx(&mut self, patch: Value) {
        match (&mut self.ctx, patch) {
            (Value::Object(ctx), Value::Object(patch)) => {
                for (key, value) in patch {
                    ctx.insert(key, value);
                }
            }
            (ctx, patch) => *ctx = patch,
        }
    }
}

// ---------------------------------------------------------------------------
// Middleware / Resolver / Resolved
// ---------------------------------------------------------------------------

/// What a middleware tells the chain to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Proceed to the next middleware (or the resolver).
    Continue,
    /// Short-circuit the whole call as a silent skip.
    Skip,
}

/// One stage of a procedure's chain. Runs strictly in registration
/// order; an `Err` aborts the call.
pub type Middleware = Arc<
    dyn Fn(&mut CallContext) -> Result<Step, ProcedureError> + Send + Sync,
>;

/// The terminal stage: an async function from the final context to the
/// procedure output.
pub type Resolver = Arc<
    dyn Fn(CallContext) -> BoxFuture<'static, Result<Value, ProcedureError>>
        + Send
        + Sync,
>;

/// The outcome of a successful call.
///
/// `Skip` is deliberate silence — no output, no error, nothing sent,
/// nothing logged. It exists so publish fan-out can drop updates for
/// clients a filter rejected without conflating that with failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// The procedure produced a value.
    Value(Value),
    /// The procedure intentionally produced nothing for this caller.
    Skip,
}

// ---------------------------------------------------------------------------
// Procedure
// ---------------------------------------------------------------------------

/// A named server operation: middleware chain + resolver, frozen.
///
/// Immutable once built and cheap to clone — every part is behind an
/// `Arc`, so a `Procedure` in a router and the same `Procedure` held by
/// three sessions share storage.
#[derive(Clone)]
pub struct Procedure {
    kind: ProcedureKind,
    middlewares: Vec<Middleware>,
    output_parser: Option<ParseFn>,
    resolver: Resolver,
}

impl Procedure {
    pub(crate) fn new(
        kind: ProcedureKind,
        middlewares: Vec<Middleware>,
        output_parser: Option<ParseFn>,
        resolver: Resolver,
    ) -> Self {
        Self {
            kind,
            middlewares,
            output_parser,
            resolver,
        }
    }

    /// This procedure's kind.
    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    /// Executes the chain: middlewares left-to-right, then the
    /// resolver, then the output parser if one was set.
    ///
    /// # Errors
    /// - [`ProcedureError::Validation`] from an input or output parser.
    /// - Whatever a middleware or the resolver raised.
    pub async fn call(
        &self,
        mut call: CallContext,
    ) -> Result<Resolved, ProcedureError> {
        for middleware in &self.middlewares {
            match middleware(&mut call)? {
                Step::Continue => {}
                Step::Skip => return Ok(Resolved::Skip),
            }
        }

        let output = (self.resolver)(call).await?;

        let output = match &self.output_parser {
            Some(parse) => parse(&output).map_err(|field_errors| {
                ProcedureError::Validation { field_errors }
            })?,
            None => output,
        };

        Ok(Resolved::Value(output))
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("kind", &self.kind)
            .field("middlewares", &self.middlewares.len())
            .field("has_output_parser", &self.output_parser.is_some())
            .finish_non_exhaustive()
    }
}
