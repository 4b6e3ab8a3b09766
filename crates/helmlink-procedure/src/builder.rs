//! The procedure builder: composable chains with structural sharing.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::{
    CallContext, Middleware, ParseFn, Procedure, ProcedureError,
    ProcedureKind, Resolver, Step,
};

/// Composes middlewares in front of a resolver.
///
/// Every chaining method takes `&self` and returns a **new** builder;
/// the receiver stays valid. Middlewares are `Arc`-shared, so a partial
/// chain is a cheap prefix that many procedures can branch from:
///
/// ```rust
/// use helmlink_procedure::{ProcedureBuilder, ProcedureKind};
/// use serde_json::json;
///
/// let authed = ProcedureBuilder::new()
///     .use_middleware(|call| {
///         call.merge_ctx(json!({ "authed": true }));
///         Ok(helmlink_procedure::Step::Continue)
///     });
///
/// // Both procedures share the auth prefix; neither invalidates the other.
/// let whoami = authed.request(|call| async move { Ok(call.ctx) });
/// let ping = authed.request(|_| async { Ok(json!("pong")) });
/// assert_eq!(whoami.kind(), ProcedureKind::Request);
/// assert_eq!(ping.kind(), ProcedureKind::Request);
/// ```
///
/// The finalizers ([`request`](Self::request), [`send`](Self::send),
/// [`data_stream`](Self::data_stream)) are non-destructive: each call
/// freezes the current chain into an independent [`Procedure`] and
/// leaves the builder untouched. A builder never stores a resolver, so
/// there is no "last finalizer wins" override to worry about — two
/// finalizer calls produce two procedures, each with exactly one kind.
#[derive(Clone, Default)]
pub struct ProcedureBuilder {
    middlewares: Vec<Middleware>,
    output_parser: Option<ParseFn>,
}

impl ProcedureBuilder {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an input-validation stage. The parser's output replaces
    /// the call input, so later stages see the normalized shape.
    ///
    /// Multiple `input` calls compose: each parser receives the output
    /// of the previous one.
    pub fn input(&self, parser: ParseFn) -> Self {
        let mut next = self.clone();
        next.middlewares.push(Arc::new(move |call: &mut CallContext| {
            match parser(&call.input) {
                Ok(parsed) => {
                    call.input = parsed;
                    Ok(Step::Continue)
                }
                Err(field_errors) => {
                    Err(ProcedureError::Validation { field_errors })
                }
            }
        }));
        next
    }

    /// Sets the output parser, applied to the resolver's return value.
    /// A second call replaces the first.
    pub fn output(&self, parser: ParseFn) -> Self {
        let mut next = self.clone();
        next.output_parser = Some(parser);
        next
    }

    /// Appends a custom middleware stage.
    pub fn use_middleware<F>(&self, middleware: F) -> Self
    where
        F: Fn(&mut CallContext) -> Result<Step, ProcedureError>
            + Send
            + Sync
            + 'static,
    {
        let mut next = self.clone();
        next.middlewares.push(Arc::new(middleware));
        next
    }

    /// Appends a publish filter.
    ///
    /// The predicate sees the payload that triggered a re-evaluation.
    /// Returning `false` skips this client silently — no frame, no
    /// error, no log line. Direct fetches (no trigger) always pass, so
    /// a subscription's first paint is never filtered away.
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.use_middleware(move |call| match &call.trigger {
            Some(payload) if !predicate(payload) => Ok(Step::Skip),
            _ => Ok(Step::Continue),
        })
    }

    /// Freezes the chain into a `request` procedure.
    pub fn request<F, Fut>(&self, resolver: F) -> Procedure
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProcedureError>>
            + Send
            + 'static,
    {
        self.finalize(ProcedureKind::Request, resolver)
    }

    /// Freezes the chain into a `send` (mutation) procedure.
    pub fn send<F, Fut>(&self, resolver: F) -> Procedure
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProcedureError>>
            + Send
            + 'static,
    {
        self.finalize(ProcedureKind::Send, resolver)
    }

    /// Freezes the chain into a `dataStream` procedure. The resolver's
    /// output is expected to be the flat entity list for the snapshot
    /// channel.
    pub fn data_stream<F, Fut>(&self, resolver: F) -> Procedure
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProcedureError>>
            + Send
            + 'static,
    {
        self.finalize(ProcedureKind::DataStream, resolver)
    }

    fn finalize<F, Fut>(&self, kind: ProcedureKind, resolver: F) -> Procedure
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProcedureError>>
            + Send
            + 'static,
    {
        let resolver: Resolver = Arc::new(move |call| {
            Box::pin(resolver(call))
                as BoxFuture<'static, Result<Value, ProcedureError>>
        });
        Procedure::new(
            kind,
            self.middlewares.clone(),
            self.output_parser.clone(),
            resolver,
        )
    }
}
