use std::str::FromStr;

use axum::{
    extract::{multipart::Field, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use mep_core::constraints::Violation;
use mep_core::{AttachmentId, Context, Metadata, SourceFile};
use mep_db::DbError;
use mep_service::{detect_mime_type, AttachmentView, StorageError};
use mep_store::RequestContext;
use serde_json::{json, Value};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::AppState;

type ApiError = (StatusCode, Json<Value>);

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/attachments", post(upload))
        .route(
            "/api/attachments/{id}",
            get(get_attachment).delete(delete_attachment),
        )
}

/// Scheme and host of the incoming request, honouring a TLS-terminating proxy.
fn request_context(headers: &HeaderMap) -> Option<RequestContext> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");
    Some(RequestContext::new(scheme, host))
}

struct Upload {
    temp: TempPath,
    client_name: String,
    size: u64,
}

async fn save_field(mut field: Field<'_>) -> Result<Upload, ApiError> {
    let client_name = field.file_name().unwrap_or_default().to_string();
    let temp = tempfile::Builder::new()
        .prefix("mep-upload-")
        .tempfile()
        .map_err(internal)?
        .into_temp_path();
    let mut file = tokio::fs::File::create(&temp).await.map_err(internal)?;
    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
        size += chunk.len() as u64;
        file.write_all(&chunk).await.map_err(internal)?;
    }
    file.flush().await.map_err(internal)?;
    Ok(Upload {
        temp,
        client_name,
        size,
    })
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim(), "1" | "true" | "on" | "yes")
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AttachmentView>), ApiError> {
    let mut upload = None;
    let mut context = None;
    let mut compress = false;
    let mut violations = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => upload = Some(save_field(field).await?),
            "context" => {
                let raw = field.text().await.map_err(bad_multipart)?;
                if raw.trim().is_empty() {
                    continue;
                }
                match Context::from_str(raw.trim()) {
                    Ok(parsed) => context = Some(parsed),
                    Err(e) => violations.push(Violation::new("context", e.to_string())),
                }
            }
            "compress" => compress = parse_flag(&field.text().await.map_err(bad_multipart)?),
            _ => {}
        }
    }

    let upload = match upload {
        Some(upload) if upload.size > 0 && !upload.client_name.is_empty() => Some(upload),
        _ => {
            violations.push(Violation::new("file", "This value should not be blank."));
            None
        }
    };
    if let Some(upload) = &upload {
        let mime_type = detect_mime_type(&upload.temp, &upload.client_name).await;
        violations.extend(state.constraints.validate(
            "file",
            &upload.client_name,
            mime_type,
            upload.size,
        ));
    }
    let upload = match upload {
        Some(upload) if violations.is_empty() => upload,
        _ => return Err((StatusCode::BAD_REQUEST, Json(json!(violations)))),
    };

    let mut metadata = Metadata::new();
    if let Some(context) = context {
        metadata
            .insert(mep_core::metadata::CONTEXT_KEY, context.to_string())
            .map_err(internal)?;
    }
    let mut options = Metadata::new();
    if compress {
        options.insert("compress", true).map_err(internal)?;
    }

    let attachment = state
        .manager
        .store(
            SourceFile::uploaded(upload.temp.to_path_buf(), upload.client_name),
            metadata,
            options,
        )
        .await
        .map_err(to_error)?;

    let request = request_context(&headers);
    Ok((
        StatusCode::CREATED,
        Json(state.manager.normalize(&attachment, request.as_ref())),
    ))
}

fn parse_id(raw: &str) -> Result<AttachmentId, ApiError> {
    raw.parse().map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("not found: attachment {raw}") })),
        )
    })
}

async fn get_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AttachmentView>, ApiError> {
    let attachment = state.manager.get(parse_id(&id)?).await.map_err(to_error)?;
    let request = request_context(&headers);
    Ok(Json(state.manager.normalize(&attachment, request.as_ref())))
}

async fn delete_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let attachment = state.manager.get(parse_id(&id)?).await.map_err(to_error)?;
    state.manager.remove(&attachment).await.map_err(to_error)?;
    Ok(StatusCode::NO_CONTENT)
}

fn to_error(e: StorageError) -> ApiError {
    let status = match &e {
        StorageError::Db(DbError::NotFound(_)) => StatusCode::NOT_FOUND,
        StorageError::Db(DbError::InvalidInput(_))
        | StorageError::Attachment(_)
        | StorageError::FileNotFound(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("attachment request failed: {e}");
    }
    (status, Json(json!({ "error": e.to_string() })))
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> ApiError {
    (e.status(), Json(json!({ "error": e.body_text() })))
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}
