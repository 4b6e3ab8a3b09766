//! One-shot HTTP calls: `netRequest` reads and `netSend` mutations.

use reqwest::multipart;
use serde_json::{Map, Value};

use crate::ClientError;

/// The server route for one-shot request procedures.
pub const NET_REQUEST_PATH: &str = "/netRequest";
/// The server route for send (mutation) procedures.
pub const NET_SEND_PATH: &str = "/netSend";

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// One value in a `net_send` input: plain JSON, a file, or a list of
/// files.
#[derive(Debug, Clone)]
pub enum SendValue {
    Json(Value),
    File(FilePart),
    Files(Vec<FilePart>),
}

/// The input of a `net_send` call: ordered field → value pairs.
pub type SendInput = Vec<(String, SendValue)>;

/// The placeholder written into the JSON-encoded `params` field where a
/// file value was extracted into its own multipart part.
pub fn file_placeholder(field: &str) -> String {
    format!("file:{field}")
}

/// HTTP client for the one-shot endpoints.
///
/// ## Example
///
/// ```rust,no_run
/// use helmlink_client::HttpClient;
/// use serde_json::json;
///
/// # async fn demo() -> Result<(), helmlink_client::ClientError> {
/// let client = HttpClient::new("http://127.0.0.1:8080");
/// let course = client
///     .net_request("navigation.course", json!({ "shipId": 1 }))
///     .await?;
/// # let _ = course;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpClient {
    /// A client for the server at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Calls a `request` procedure: POST JSON `{"path": path, ...input}`.
    ///
    /// # Errors
    /// - [`ClientError::Server`] when the response carries an `error`
    ///   field (4xx).
    /// - [`ClientError::Http`] / [`ClientError::Decode`] for transport
    ///   and body-shape failures.
    pub async fn net_request(
        &self,
        path: &str,
        input: Value,
    ) -> Result<Value, ClientError> {
        let body = merge_path(path, input)?;
        let response = self
            .http
            .post(format!("{}{NET_REQUEST_PATH}", self.base_url))
            .json(&body)
            .send()
            .await?;
        read_response(response).await
    }

    /// Calls a `send` procedure.
    ///
    /// With no file values the body is plain JSON, exactly like
    /// [`net_request`](Self::net_request). With files it becomes
    /// `multipart/form-data`: a `path` field, a `params` field holding
    /// the JSON-encoded scalars (file values replaced by placeholders),
    /// and one part per file keyed by its field name — lists of files
    /// get a `[]` suffix on the part name.
    pub async fn net_send(
        &self,
        path: &str,
        input: SendInput,
    ) -> Result<Value, ClientError> {
        let url = format!("{}{NET_SEND_PATH}", self.base_url);
        let (params, files) = split_input(input);

        let response = if files.is_empty() {
            let body = merge_path(path, Value::Object(params))?;
            self.http.post(url).json(&body).send().await?
        } else {
            let mut form = multipart::Form::new()
                .text("path", path.to_string())
                .text(
                    "params",
                    serde_json::to_string(&Value::Object(params))?,
                );
            for (name, file) in files {
                form = form.part(
                    name,
                    multipart::Part::bytes(file.bytes)
                        .file_name(file.file_name),
                );
            }
            self.http.post(url).multipart(form).send().await?
        };

        read_response(response).await
    }
}

/// Builds the JSON body `{"path": path, ...input}`.
fn merge_path(path: &str, input: Value) -> Result<Value, ClientError> {
    let mut body = match input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ClientError::InvalidInput(other.to_string()));
        }
    };
    body.insert("path".to_string(), Value::String(path.to_string()));
    Ok(Value::Object(body))
}

/// Splits a send input into the JSON params object (files replaced by
/// placeholders) and the list of multipart parts to append.
fn split_input(input: SendInput) -> (Map<String, Value>, Vec<(String, FilePart)>) {
    let mut params = Map::new();
    let mut files = Vec::new();

    for (field, value) in input {
        match value {
            SendValue::Json(v) => {
                params.insert(field, v);
            }
            SendValue::File(file) => {
                params.insert(
                    field.clone(),
                    Value::String(file_placeholder(&field)),
                );
                files.push((field, file));
            }
            SendValue::Files(list) => {
                let placeholders: Vec<Value> = list
                    .iter()
                    .map(|_| Value::String(file_placeholder(&field)))
                    .collect();
                params
                    .insert(field.clone(), Value::Array(placeholders));
                for file in list {
                    files.push((format!("{field}[]"), file));
                }
            }
        }
    }

    (params, files)
}

/// Maps a response to `Ok(body)` or a scoped server error.
async fn read_response(
    response: reqwest::Response,
) -> Result<Value, ClientError> {
    let status = response.status();
    let text = response.text().await?;
    let body: Value = serde_json::from_str(&text)
        .unwrap_or(Value::String(text.clone()));

    if status.is_success() {
        return Ok(body);
    }

    let message = match &body["error"] {
        Value::String(s) => s.clone(),
        Value::Null => text,
        other => other.to_string(),
    };
    Err(ClientError::Server(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_path_into_object_input() {
        let body =
            merge_path("navigation.setCourse", json!({ "heading": 90.0 }))
                .unwrap();
        assert_eq!(body["path"], "navigation.setCourse");
        assert_eq!(body["heading"], 90.0);
    }

    #[test]
    fn test_merge_path_with_null_input() {
        let body = merge_path("ping", Value::Null).unwrap();
        assert_eq!(body, json!({ "path": "ping" }));
    }

    #[test]
    fn test_merge_path_rejects_non_object_input() {
        assert!(matches!(
            merge_path("ping", json!([1, 2])),
            Err(ClientError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_split_input_scalars_only() {
        let (params, files) = split_input(vec![
            ("name".into(), SendValue::Json(json!("Aurora"))),
            ("speed".into(), SendValue::Json(json!(3))),
        ]);
        assert_eq!(params["name"], "Aurora");
        assert_eq!(params["speed"], 3);
        assert!(files.is_empty());
    }

    #[test]
    fn test_split_input_replaces_file_with_placeholder() {
        let (params, files) = split_input(vec![
            ("label".into(), SendValue::Json(json!("chart"))),
            (
                "image".into(),
                SendValue::File(FilePart {
                    file_name: "chart.png".into(),
                    bytes: vec![1, 2, 3],
                }),
            ),
        ]);

        assert_eq!(params["label"], "chart");
        assert_eq!(params["image"], "file:image");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "image");
        assert_eq!(files[0].1.file_name, "chart.png");
    }

    #[test]
    fn test_split_input_file_list_gets_bracket_suffix() {
        let (params, files) = split_input(vec![(
            "pages".into(),
            SendValue::Files(vec![
                FilePart {
                    file_name: "a.png".into(),
                    bytes: vec![1],
                },
                FilePart {
                    file_name: "b.png".into(),
                    bytes: vec![2],
                },
            ]),
        )]);

        assert_eq!(
            params["pages"],
            json!(["file:pages", "file:pages"])
        );
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "pages[]");
        assert_eq!(files[1].0, "pages[]");
    }
}
