//! Multipart file uploads.
//!
//! Files posted as `jsonRpc.file.<dotted.path>` parts are streamed to the
//! configured temp directory and injected into the call's params as
//! [`FormFile`] objects. An [`UploadBatch`] remembers every temp file of
//! one request and deletes whatever the method did not move away.

use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, MultipartError};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use utoipa::ToSchema;

use crate::config::UploadSettings;
use crate::error::GatewayError;

/// Form field prefix marking a file destined for the call's params.
pub const FILE_FIELD_PREFIX: &str = "jsonRpc.file.";

/// An uploaded file as seen by RPC methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FormFile {
    /// Client-side file name.
    pub name: String,
    /// Declared content type.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Where the upload is stored until the call completes.
    #[schema(value_type = String)]
    pub temp_file_path: PathBuf,
}

impl FormFile {
    /// Returns `true` if the temp file lives in the configured upload
    /// directory. Params are client-controlled, so methods should check
    /// this before touching the file.
    #[must_use]
    pub fn is_issued_by(&self, settings: &UploadSettings) -> bool {
        self.temp_file_path.parent() == Some(settings.storage_tmp_dir.as_path())
    }

    /// Moves the temp file to `dest`, keeping it past the end of the call.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Io`] if the file can be neither renamed nor
    /// copied.
    pub async fn persist(&self, dest: impl AsRef<Path>) -> Result<(), GatewayError> {
        let dest = dest.as_ref();
        if tokio::fs::rename(&self.temp_file_path, dest).await.is_err() {
            // Cross-device moves need a copy.
            tokio::fs::copy(&self.temp_file_path, dest).await?;
            tokio::fs::remove_file(&self.temp_file_path).await?;
        }
        Ok(())
    }
}

/// Temp files written while reading one request.
#[derive(Debug)]
pub struct UploadBatch {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl UploadBatch {
    /// Creates an empty batch writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            paths: Vec::new(),
        }
    }

    /// Number of temp files written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns `true` if no file was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Streams a file part to a fresh temp file.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PayloadTooLarge`] once the part exceeds
    /// `limit` bytes, or an I/O or multipart error.
    pub async fn store(
        &mut self,
        field: &mut Field<'_>,
        limit: u64,
    ) -> Result<FormFile, GatewayError> {
        let name = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(uuid::Uuid::new_v4().simple().to_string());
        let mut file = tokio::fs::File::create(&path).await?;
        self.paths.push(path.clone());

        let mut size: u64 = 0;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            size = size.saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
            if size > limit {
                return Err(GatewayError::PayloadTooLarge(format!(
                    "file '{name}' exceeds {limit} bytes"
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(FormFile {
            name,
            content_type,
            size,
            temp_file_path: path,
        })
    }

    /// Deletes every temp file still present.
    pub async fn cleanup(self) {
        for path in self.paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "removed upload temp file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove upload temp file");
                }
            }
        }
    }
}

/// Reads a non-file part into memory.
///
/// # Errors
///
/// Returns [`GatewayError::PayloadTooLarge`] past `limit` bytes and
/// [`GatewayError::BadRequest`] for non UTF-8 content.
pub async fn read_text_field(field: &mut Field<'_>, limit: usize) -> Result<String, GatewayError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if buf.len().saturating_add(chunk.len()) > limit {
            return Err(GatewayError::PayloadTooLarge(format!(
                "field exceeds {limit} bytes"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf).map_err(|err| GatewayError::BadRequest(err.to_string()))
}

/// Maps an extractor rejection onto a gateway error by its status.
#[must_use]
pub fn body_error(status: StatusCode, message: String) -> GatewayError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::PayloadTooLarge(message)
    } else {
        GatewayError::BadRequest(message)
    }
}

/// Maps a multipart stream error onto a gateway error.
#[must_use]
pub fn multipart_error(err: MultipartError) -> GatewayError {
    body_error(err.status(), err.body_text())
}

/// Most nulls [`set_at_path`] inserts to reach an array index.
const MAX_ARRAY_PADDING: usize = 1024;

/// Writes `value` at the dot-separated `path` inside `target`.
///
/// Missing intermediate segments are created as empty objects. A numeric
/// segment indexes an array, padding it with nulls when the index is past
/// the end. Existing scalars and arrays addressed by a non-numeric
/// segment are kept and the write is dropped.
pub fn set_at_path(target: &mut Value, path: &str, value: Value) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    if target.is_null() {
        *target = Value::Object(Map::new());
    }
    let slot = match target {
        Value::Object(map) => map.entry(head.to_string()).or_insert(Value::Null),
        Value::Array(items) => {
            let Ok(index) = head.parse::<usize>() else {
                tracing::debug!(segment = head, "non-numeric segment on array, file dropped");
                return;
            };
            if index.saturating_sub(items.len()) > MAX_ARRAY_PADDING {
                tracing::debug!(index, "array index too far past the end, file dropped");
                return;
            }
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            let Some(slot) = items.get_mut(index) else {
                return;
            };
            slot
        }
        _ => {
            tracing::debug!(segment = head, "path crosses a scalar, file dropped");
            return;
        }
    };
    match rest {
        Some(rest) => set_at_path(slot, rest, value),
        None => *slot = value,
    }
}

/// Injects uploaded files into the envelope's `params`.
///
/// Files sharing a path become an array in upload order.
///
/// # Errors
///
/// Returns [`GatewayError::Serialization`] if a file cannot be encoded.
pub fn inject_files(
    envelope: &mut Value,
    files: Vec<(String, FormFile)>,
) -> Result<(), GatewayError> {
    let Value::Object(object) = envelope else {
        return Ok(());
    };
    let mut grouped: Vec<(String, Vec<FormFile>)> = Vec::new();
    for (path, file) in files {
        match grouped.iter_mut().find(|(p, _)| *p == path) {
            Some((_, group)) => group.push(file),
            None => grouped.push((path, vec![file])),
        }
    }
    let params = object.entry("params").or_insert(Value::Null);
    for (path, mut group) in grouped {
        let value = if group.len() == 1 {
            match group.pop() {
                Some(file) => serde_json::to_value(file)?,
                None => Value::Null,
            }
        } else {
            serde_json::to_value(group)?
        };
        set_at_path(params, &path, value);
    }
    Ok(())
}
