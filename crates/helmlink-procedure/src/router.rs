//! The router: a flattened, immutable map from dotted path to procedure.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{
    CallContext, Procedure, ProcedureError, ProcedureKind, Resolved,
};

/// One entry in a router tree: a leaf procedure or a nested router.
#[derive(Debug, Clone)]
pub enum RouterNode {
    Procedure(Procedure),
    Router(Router),
}

impl From<Procedure> for RouterNode {
    fn from(procedure: Procedure) -> Self {
        Self::Procedure(procedure)
    }
}

impl From<Router> for RouterNode {
    fn from(router: Router) -> Self {
        Self::Router(router)
    }
}

/// An immutable mapping from dotted path to [`Procedure`].
///
/// Built by recursively flattening a tree of named procedures and
/// sub-routers: a procedure registered as `"course"` under a router
/// mounted as `"navigation"` is callable at `"navigation.course"`.
///
/// Construction fails fast on any path collision, batching **all**
/// collisions into one error — one pass over the composition surfaces
/// every mistake.
///
/// Cloning is cheap (`Arc`-shared map); sessions hold clones.
#[derive(Clone)]
pub struct Router {
    procedures: Arc<HashMap<String, Procedure>>,
}

impl Router {
    /// Flattens `tree` into a router.
    ///
    /// Entries are walked depth-first in order. A nested router inlines
    /// its already-flattened paths under the current prefix.
    ///
    /// # Errors
    /// [`ProcedureError::DuplicatePaths`] listing every collision.
    pub fn new(
        tree: Vec<(String, RouterNode)>,
    ) -> Result<Self, ProcedureError> {
        let mut procedures = HashMap::new();
        let mut duplicates = Vec::new();

        for (name, node) in tree {
            match node {
                RouterNode::Procedure(procedure) => {
                    insert_checked(
                        &mut procedures,
                        &mut duplicates,
                        name,
                        procedure,
                    );
                }
                RouterNode::Router(router) => {
                    for (sub_path, procedure) in
                        router.procedures.iter()
                    {
                        insert_checked(
                            &mut procedures,
                            &mut duplicates,
                            format!("{name}.{sub_path}"),
                            procedure.clone(),
                        );
                    }
                }
            }
        }

        if !duplicates.is_empty() {
            duplicates.sort();
            duplicates.dedup();
            return Err(ProcedureError::DuplicatePaths {
                paths: duplicates,
            });
        }

        Ok(Self {
            procedures: Arc::new(procedures),
        })
    }

    /// The flattened path → procedure map.
    pub fn procedures(&self) -> &HashMap<String, Procedure> {
        &self.procedures
    }

    /// Looks up `path`, verifies the procedure's kind, and invokes it.
    ///
    /// # Errors
    /// [`ProcedureError::NoSuchProcedure`] when the path is unknown
    /// **or** the registered procedure has a different kind — a `send`
    /// must not be callable as a `request`.
    pub async fn call(
        &self,
        path: &str,
        kind: ProcedureKind,
        call: CallContext,
    ) -> Result<Resolved, ProcedureError> {
        let procedure = self
            .procedures
            .get(path)
            .filter(|p| p.kind() == kind)
            .ok_or_else(|| ProcedureError::NoSuchProcedure {
                path: path.to_string(),
                kind,
            })?;
        procedure.call(call).await
    }

    /// Looks up the procedure at `path` with the given kind, without
    /// calling it. Used by the session to validate subscriptions before
    /// registering listeners.
    pub fn get(
        &self,
        path: &str,
        kind: ProcedureKind,
    ) -> Option<&Procedure> {
        self.procedures.get(path).filter(|p| p.kind() == kind)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<_> = self.procedures.keys().collect();
        paths.sort();
        f.debug_struct("Router").field("paths", &paths).finish()
    }
}

/// Inserts unless the path is taken, recording collisions.
fn insert_checked(
    procedures: &mut HashMap<String, Procedure>,
    duplicates: &mut Vec<String>,
    path: String,
    procedure: Procedure,
) {
    if procedures.contains_key(&path) {
        duplicates.push(path);
    } else {
        procedures.insert(path, procedure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcedureBuilder;
    use serde_json::json;

    fn noop_request() -> Procedure {
        ProcedureBuilder::new().request(|_| async { Ok(json!(null)) })
    }

    fn noop_send() -> Procedure {
        ProcedureBuilder::new().send(|_| async { Ok(json!(null)) })
    }

    fn entry(
        name: &str,
        node: impl Into<RouterNode>,
    ) -> (String, RouterNode) {
        (name.to_string(), node.into())
    }

    #[test]
    fn test_new_flattens_nested_routers() {
        let navigation = Router::new(vec![
            entry("course", noop_request()),
            entry("setCourse", noop_send()),
        ])
        .unwrap();
        let root = Router::new(vec![
            entry("navigation", navigation),
            entry("ping", noop_request()),
        ])
        .unwrap();

        let mut paths: Vec<_> =
            root.procedures().keys().cloned().collect();
        paths.sort();
        assert_eq!(
            paths,
            vec!["navigation.course", "navigation.setCourse", "ping"]
        );
    }

    #[test]
    fn test_new_flattens_doubly_nested_routers() {
        let inner =
            Router::new(vec![entry("status", noop_request())]).unwrap();
        let middle = Router::new(vec![entry("reactor", inner)]).unwrap();
        let root = Router::new(vec![entry("power", middle)]).unwrap();

        assert!(
            root.procedures().contains_key("power.reactor.status"),
            "got {root:?}"
        );
    }

    #[test]
    fn test_new_reports_all_duplicates_at_once() {
        // Two collisions: a sibling clash and a nested-vs-leaf clash.
        let sub = Router::new(vec![entry("course", noop_request())])
            .unwrap();
        let result = Router::new(vec![
            entry("ping", noop_request()),
            entry("ping", noop_request()),
            entry("navigation", sub),
            entry("navigation.course", noop_request()),
        ]);

        let Err(ProcedureError::DuplicatePaths { paths }) = result else {
            panic!("expected DuplicatePaths, got {result:?}");
        };
        assert_eq!(paths, vec!["navigation.course", "ping"]);
    }

    #[tokio::test]
    async fn test_call_unknown_path_is_no_such_procedure() {
        let router = Router::new(vec![]).unwrap();
        let err = router
            .call("ghost", ProcedureKind::Request, CallContext::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcedureError::NoSuchProcedure { path, .. } if path == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_call_kind_mismatch_is_no_such_procedure() {
        // A send procedure must not be reachable as a request.
        let router =
            Router::new(vec![entry("fire", noop_send())]).unwrap();
        let err = router
            .call("fire", ProcedureKind::Request, CallContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcedureError::NoSuchProcedure { .. }));
    }

    #[tokio::test]
    async fn test_call_dispatches_to_resolver() {
        let echo = ProcedureBuilder::new()
            .request(|call| async move { Ok(call.input) });
        let router = Router::new(vec![entry("echo", echo)]).unwrap();

        let call = CallContext::new(json!({}), json!({ "x": 7 }));
        let resolved = router
            .call("echo", ProcedureKind::Request, call)
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::Value(json!({ "x": 7 })));
    }

    #[test]
    fn test_get_respects_kind() {
        let router =
            Router::new(vec![entry("fire", noop_send())]).unwrap();
        assert!(router.get("fire", ProcedureKind::Send).is_some());
        assert!(router.get("fire", ProcedureKind::Request).is_none());
        assert!(router.get("ghost", ProcedureKind::Send).is_none());
    }

    #[test]
    fn test_router_is_cheap_to_clone_and_shared() {
        let router =
            Router::new(vec![entry("ping", noop_request())]).unwrap();
        let clone = router.clone();
        assert!(Arc::ptr_eq(&router.procedures, &clone.procedures));
    }
}
