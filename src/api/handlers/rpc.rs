//! JSON-RPC over HTTP.
//!
//! `POST <path>` accepts three body encodings:
//!
//! - `application/json`: the body is the envelope.
//! - `application/x-www-form-urlencoded` and `multipart/form-data`: the
//!   envelope is the `jsonRpc` field; multipart file parts named
//!   `jsonRpc.file.<dotted.path>` are injected into the params.
//!
//! Any other content type is answered with `400` before rate limiting.
//! RPC-level outcomes, errors included, are always `200` with a JSON
//! envelope.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Form, FromRequest, Multipart, Request, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use crate::api::upload::{
    FILE_FIELD_PREFIX, FormFile, UploadBatch, body_error, inject_files, multipart_error,
    read_text_field,
};
use crate::config::UploadSettings;
use crate::domain::{CallContext, ContextFactory, RateLimiter};
use crate::error::GatewayError;
use crate::rpc::{RpcProcessor, RpcResponse};

/// Form field carrying the envelope.
pub const JSON_RPC_FIELD: &str = "jsonRpc";

const MISSING_FIELD: &str = "Missing jsonRpc field";
const INVALID_FIELD_TYPE: &str = "Invalid jsonRpc field type";
const PARSE_FAILED: &str = "Error during parsing json-rpc request";

/// Accepted request encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// `application/json`.
    Json,
    /// `application/x-www-form-urlencoded`.
    UrlEncoded,
    /// `multipart/form-data`.
    Multipart,
}

impl BodyKind {
    /// Classifies a request by its `Content-Type` essence.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
        let essence = value.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case("application/json") {
            Some(Self::Json)
        } else if essence.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            Some(Self::UrlEncoded)
        } else if essence.eq_ignore_ascii_case("multipart/form-data") {
            Some(Self::Multipart)
        } else {
            None
        }
    }
}

enum JsonRpcField {
    Text(String),
    File,
}

struct FormPayload {
    json_rpc: Option<JsonRpcField>,
    files: Vec<(String, FormFile)>,
}

/// HTTP binding of an RPC processor.
#[derive(Debug, Clone)]
pub struct HttpRpcEndpoint {
    processor: Arc<RpcProcessor>,
    rate_limiter: Arc<RateLimiter>,
    limit_api: bool,
    uploads: UploadSettings,
    contexts: ContextFactory,
}

impl HttpRpcEndpoint {
    /// Creates an endpoint. With `limit_api` every request is charged.
    #[must_use]
    pub const fn new(
        processor: Arc<RpcProcessor>,
        rate_limiter: Arc<RateLimiter>,
        limit_api: bool,
        uploads: UploadSettings,
        contexts: ContextFactory,
    ) -> Self {
        Self {
            processor,
            rate_limiter,
            limit_api,
            uploads,
            contexts,
        }
    }

    /// Router serving the endpoint at `path`.
    pub fn into_router<S>(self, path: &str) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let body_limit = self.uploads.max_request_body;
        Router::new()
            .route(path, post(rpc_handler))
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(Arc::new(self))
    }

    /// Runs one HTTP request through the RPC pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnsupportedContentType`] for unknown
    /// encodings, and body decoding or upload failures.
    pub async fn handle(&self, request: Request) -> Result<RpcResponse, GatewayError> {
        let kind =
            BodyKind::from_headers(request.headers()).ok_or(GatewayError::UnsupportedContentType)?;
        let ctx = self
            .contexts
            .for_request(request.extensions(), request.headers());

        if self.limit_api && !self.rate_limiter.can_perform_request(ctx.address()) {
            return Ok(self.processor.rate_limit_exceeded(&ctx));
        }

        match kind {
            BodyKind::Json => {
                let body = Bytes::from_request(request, &())
                    .await
                    .map_err(|r| body_error(r.status(), r.body_text()))?;
                self.check_json_size(body.len())?;
                Ok(self.processor.process_bytes(&ctx, &body).await)
            }
            BodyKind::UrlEncoded => {
                let Form(fields) = Form::<Vec<(String, String)>>::from_request(request, &())
                    .await
                    .map_err(|r| body_error(r.status(), r.body_text()))?;
                let json_rpc = fields
                    .into_iter()
                    .find(|(name, _)| name == JSON_RPC_FIELD)
                    .map(|(_, value)| value);
                if let Some(text) = &json_rpc {
                    self.check_json_size(text.len())?;
                }
                let payload = FormPayload {
                    json_rpc: json_rpc.map(JsonRpcField::Text),
                    files: Vec::new(),
                };
                self.process_form(&ctx, payload).await
            }
            BodyKind::Multipart => {
                let mut multipart = Multipart::from_request(request, &())
                    .await
                    .map_err(|r| body_error(r.status(), r.body_text()))?;
                let mut batch = UploadBatch::new(&self.uploads.storage_tmp_dir);
                let result = match self.read_multipart(&mut multipart, &mut batch).await {
                    Ok(payload) => self.process_form(&ctx, payload).await,
                    Err(err) => Err(err),
                };
                batch.cleanup().await;
                result
            }
        }
    }

    fn check_json_size(&self, len: usize) -> Result<(), GatewayError> {
        if len > self.uploads.max_json_payload {
            return Err(GatewayError::PayloadTooLarge(format!(
                "json-rpc request exceeds {} bytes",
                self.uploads.max_json_payload
            )));
        }
        Ok(())
    }

    async fn read_multipart(
        &self,
        multipart: &mut Multipart,
        batch: &mut UploadBatch,
    ) -> Result<FormPayload, GatewayError> {
        let mut payload = FormPayload {
            json_rpc: None,
            files: Vec::new(),
        };
        while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            let is_file = field.file_name().is_some();
            if name == JSON_RPC_FIELD {
                if payload.json_rpc.is_some() {
                    continue;
                }
                payload.json_rpc = Some(if is_file {
                    JsonRpcField::File
                } else {
                    JsonRpcField::Text(
                        read_text_field(&mut field, self.uploads.max_json_payload).await?,
                    )
                });
            } else if let Some(path) = name.strip_prefix(FILE_FIELD_PREFIX)
                && is_file
                && !path.is_empty()
            {
                let file = batch
                    .store(&mut field, self.uploads.file_size_limit)
                    .await?;
                payload.files.push((path.to_string(), file));
            }
        }
        Ok(payload)
    }

    async fn process_form(
        &self,
        ctx: &CallContext,
        payload: FormPayload,
    ) -> Result<RpcResponse, GatewayError> {
        let text = match payload.json_rpc {
            None => return Ok(self.processor.parse_error(ctx, Some(MISSING_FIELD))),
            Some(JsonRpcField::File) => {
                return Ok(self.processor.parse_error(ctx, Some(INVALID_FIELD_TYPE)));
            }
            Some(JsonRpcField::Text(text)) => text,
        };
        let Ok(mut envelope) = serde_json::from_str::<Value>(&text) else {
            return Ok(self.processor.parse_error(ctx, Some(PARSE_FAILED)));
        };
        inject_files(&mut envelope, payload.files)?;
        Ok(self.processor.process_value(ctx, envelope).await)
    }
}

/// `POST <rpc path>` handler.
pub async fn rpc_handler(
    State(endpoint): State<Arc<HttpRpcEndpoint>>,
    request: Request,
) -> Response {
    match endpoint.handle(request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => {
            tracing::info!(error = %err, "rejected http rpc request");
            err.into_response()
        }
    }
}
