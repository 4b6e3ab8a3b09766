//! # Helmlink
//!
//! Typed RPC and live-query state synchronization for real-time
//! simulation UIs.
//!
//! Helmlink gives many independent UI surfaces one consistent way to
//! (a) call server mutations, (b) request server-computed views that
//! refresh automatically when a mutation publishes, and (c) receive a
//! high-frequency stream of moving-entity snapshots that render
//! smoothly despite a coarse server tick.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use helmlink::prelude::*;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), HelmlinkError> {
//! let pubsub = Arc::new(PubSub::new());
//!
//! let course = ProcedureBuilder::new()
//!     .request(|_| async { Ok(json!({ "heading": 0.0 })) });
//! let router = Router::new(vec![(
//!     "navigation.course".to_string(),
//!     RouterNode::from(course),
//! )])?;
//!
//! let server = HelmlinkServer::builder()
//!     .bind_ws("127.0.0.1:8080")
//!     .bind_http("127.0.0.1:8081")
//!     .build(router, pubsub)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod http;
mod server;

pub use error::HelmlinkError;
pub use server::{HelmlinkServer, HelmlinkServerBuilder};

/// The commonly used types, re-exported in one place.
pub mod prelude {
    pub use helmlink_procedure::{
        CallContext, Procedure, ProcedureBuilder, ProcedureError,
        ProcedureKind, Resolved, Router, RouterNode, Step, parser_for,
    };
    pub use helmlink_protocol::{
        ClientFrame, EntityState, RequestId, Rotation, ServerFrame,
        Snapshot,
    };
    pub use helmlink_pubsub::PubSub;
    pub use helmlink_session::{SessionConfig, SessionState};

    pub use crate::{HelmlinkError, HelmlinkServer, HelmlinkServerBuilder};
}
