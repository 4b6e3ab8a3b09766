//! HTTP one-shot endpoints: `POST /netRequest` and `POST /netSend`.
//!
//! These mirror the socket's request/send procedures for callers that
//! don't hold a live connection. `/netSend` additionally accepts
//! `multipart/form-data` so binary inputs (uploaded assets, charts)
//! can ride next to their JSON scalars: each file part is written to a
//! temporary file and its path is substituted for the placeholder the
//! client left in `params`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{FromRequest, Json, Multipart, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use helmlink_procedure::{
    CallContext, ProcedureError, ProcedureKind, Resolved,
};
use serde_json::{Map, Value, json};

use crate::server::ServerState;

/// Counter for unique temp-file names within the process.
static NEXT_UPLOAD_ID: AtomicU64 = AtomicU64::new(1);

/// Builds the axum router for the one-shot endpoints.
pub(crate) fn http_router(state: Arc<ServerState>) -> axum::Router {
    axum::Router::new()
        .route("/netRequest", post(net_request))
        .route("/netSend", post(net_send))
        .with_state(state)
}

/// `POST /netRequest` — body `{"path": ..., ...input}`, JSON only.
async fn net_request(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<Value>,
) -> Response {
    let Some((path, input)) = split_body(body) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            json!("missing path"),
        );
    };
    dispatch(&state, ProcedureKind::Request, &path, input).await
}

/// `POST /netSend` — JSON body like `/netRequest`, or multipart with
/// `path`, `params`, and one part per file.
async fn net_send(
    State(state): State<Arc<ServerState>>,
    request: Request,
) -> Response {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let (path, input) = if is_multipart {
        match read_multipart(request).await {
            Ok(parts) => parts,
            Err(message) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    json!(message),
                );
            }
        }
    } else {
        let Ok(Json(body)) =
            Json::<Value>::from_request(request, &()).await
        else {
            return error_response(
                StatusCode::BAD_REQUEST,
                json!("invalid JSON body"),
            );
        };
        match split_body(body) {
            Some(parts) => parts,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    json!("missing path"),
                );
            }
        }
    };

    dispatch(&state, ProcedureKind::Send, &path, input).await
}

/// Pulls `path` out of a JSON body, leaving the rest as the input.
fn split_body(body: Value) -> Option<(String, Value)> {
    let Value::Object(mut map) = body else {
        return None;
    };
    let path = map.remove("path")?.as_str()?.to_string();
    Some((path, Value::Object(map)))
}

/// Reads a multipart `netSend` body: the `path` and `params` fields
/// plus file parts, which land in temp files whose paths replace the
/// client's placeholders in `params`.
async fn read_multipart(
    request: Request,
) -> Result<(String, Value), String> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| e.to_string())?;

    let mut path: Option<String> = None;
    let mut params = Value::Object(Map::new());
    // Temp-file paths per field, in part order ("pages[]" → "pages").
    let mut uploads: HashMap<String, Vec<String>> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| e.to_string())?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "path" => {
                path = Some(field.text().await.map_err(|e| e.to_string())?);
            }
            "params" => {
                let text =
                    field.text().await.map_err(|e| e.to_string())?;
                params = serde_json::from_str(&text)
                    .map_err(|e| format!("invalid params: {e}"))?;
            }
            _ => {
                let file_name = field
                    .file_name()
                    .unwrap_or("upload")
                    .to_string();
                let bytes =
                    field.bytes().await.map_err(|e| e.to_string())?;
                let temp_path = temp_file_path(&file_name);
                tokio::fs::write(&temp_path, &bytes)
                    .await
                    .map_err(|e| e.to_string())?;
                let key = name.trim_end_matches("[]").to_string();
                uploads.entry(key).or_default().push(temp_path);
            }
        }
    }

    let path = path.ok_or_else(|| "missing path field".to_string())?;
    resolve_placeholders(&mut params, &mut uploads);
    Ok((path, params))
}

/// Replaces `"file:{field}"` placeholders in `params` with the temp
/// paths of the uploaded parts, in order.
fn resolve_placeholders(
    params: &mut Value,
    uploads: &mut HashMap<String, Vec<String>>,
) {
    let Value::Object(map) = params else {
        return;
    };
    for (field, value) in map.iter_mut() {
        let Some(paths) = uploads.get_mut(field) else {
            continue;
        };
        let mut next = paths.drain(..);
        match value {
            Value::String(_) => {
                if let Some(path) = next.next() {
                    *value = Value::String(path);
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    if let Some(path) = next.next() {
                        *item = Value::String(path);
                    }
                }
            }
            _ => {}
        }
    }
}

/// A unique path under the system temp directory.
fn temp_file_path(file_name: &str) -> String {
    let id = NEXT_UPLOAD_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir()
        .join(format!(
            "helmlink-{}-{id}-{file_name}",
            std::process::id()
        ))
        .to_string_lossy()
        .into_owned()
}

/// Calls the procedure and maps the outcome onto an HTTP response.
async fn dispatch(
    state: &ServerState,
    kind: ProcedureKind,
    path: &str,
    input: Value,
) -> Response {
    let call = CallContext::new(json!({}), input);
    match state.router.call(path, kind, call).await {
        Ok(Resolved::Value(data)) => Json(data).into_response(),
        // A one-shot call has no trigger, so Skip only arises from
        // custom middlewares; the caller gets an empty success.
        Ok(Resolved::Skip) => Json(Value::Null).into_response(),
        Err(ProcedureError::Validation { field_errors }) => {
            error_response(
                StatusCode::BAD_REQUEST,
                json!({ "fieldErrors": field_errors }),
            )
        }
        Err(e @ ProcedureError::NoSuchProcedure { .. }) => {
            error_response(StatusCode::NOT_FOUND, json!(e.to_string()))
        }
        Err(e) => {
            tracing::error!(%path, error = %e, "procedure failed");
            error_response(
                StatusCode::BAD_REQUEST,
                json!(e.to_string()),
            )
        }
    }
}

fn error_response(status: StatusCode, error: Value) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}
