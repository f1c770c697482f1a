use std::time::SystemTime;

use axum::{
    Form, Json,
    body::Body,
    extract::{Multipart, Path as UrlPath, Query, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::error::{DriveError, io_or_not_found};
use crate::listing::{EntryKind, list_directory, sort_entries};
use crate::ops::{self, PendingUpload, natural_size};
use crate::paths::{resolve_and_verify_path, validate_name};
use crate::range::RangedFile;
use crate::render::render_index;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderForm {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameForm {
    #[serde(default)]
    pub old_path: String,
    #[serde(default)]
    pub new_name: String,
}

#[derive(Debug, Deserialize)]
pub struct PathForm {
    #[serde(default)]
    pub path: String,
}

/// Body of every successful mutation.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    fn success() -> Json<Self> {
        Json(Self { status: "success" })
    }
}

#[derive(Debug, Serialize)]
pub struct DetailsResponse {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub size: String,
    pub created: String,
    pub modified: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub root: String,
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format(TIME_FORMAT).to_string()
}

fn multipart_error(err: MultipartError) -> DriveError {
    error!("Multipart error: {}", err);
    DriveError::BadRequest(format!("Malformed multipart/form-data: {}", err))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        root: state.root_dir.display().to_string(),
    })
}

/// GET /?path= - Render a folder, creating it on first visit
pub async fn index(
    State(state): State<AppState>,
    Query(query): Query<IndexQuery>,
) -> Result<Html<String>, DriveError> {
    let dir = resolve_and_verify_path(&state.root_dir, &query.path)?;
    debug!("Listing {}", dir.display());

    let listing_state = state.clone();
    let mut entries = tokio::task::spawn_blocking(move || {
        list_directory(&listing_state.config, &listing_state.root_dir, &dir)
    })
    .await
    .map_err(|err| DriveError::Io(std::io::Error::other(err.to_string())))??;

    sort_entries(&mut entries);
    Ok(Html(render_index(&entries, &query.path)))
}

/// POST /create_folder
pub async fn create_folder(
    State(state): State<AppState>,
    Form(form): Form<CreateFolderForm>,
) -> Result<Json<StatusResponse>, DriveError> {
    ops::create_folder(&state, &form.path, &form.name).await?;
    Ok(StatusResponse::success())
}

/// POST /rename
pub async fn rename(
    State(state): State<AppState>,
    Form(form): Form<RenameForm>,
) -> Result<Json<StatusResponse>, DriveError> {
    ops::rename_entry(&state, &form.old_path, &form.new_name).await?;
    Ok(StatusResponse::success())
}

/// POST /delete
pub async fn delete(
    State(state): State<AppState>,
    Form(form): Form<PathForm>,
) -> Result<Json<StatusResponse>, DriveError> {
    ops::delete_entry(&state, &form.path).await?;
    Ok(StatusResponse::success())
}

/// POST /upload - multipart `path` + `file`
///
/// The fields may arrive in either order; the file is spooled to a temp
/// file and moved into place once the target folder is known.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<&'static str, DriveError> {
    let mut target_dir = String::new();
    let mut received: Option<(PendingUpload, String)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("path") => {
                target_dir = field.text().await.map_err(multipart_error)?;
            }
            Some("file") if received.is_none() => {
                let raw_name = field.file_name().unwrap_or_default().to_string();
                if raw_name.is_empty() {
                    return Err(DriveError::BadRequest("No file selected".to_string()));
                }
                let file_name = validate_name(&raw_name)?.to_string();

                let mut pending =
                    PendingUpload::create(&state.root_dir, state.config.upload_limit()).await?;
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    pending.write_chunk(&chunk).await?;
                }
                received = Some((pending, file_name));
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let Some((pending, file_name)) = received else {
        return Err(DriveError::BadRequest("No file selected".to_string()));
    };

    let dir = resolve_and_verify_path(&state.root_dir, &target_dir)?;
    let size = pending.written();
    pending.commit(&state, &dir, &file_name).await?;

    info!("Uploaded {} ({} bytes) into /{}", file_name, size, target_dir.trim_start_matches('/'));
    Ok("File uploaded successfully")
}

/// GET /download/{*path} - whole file as an attachment
pub async fn download(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
) -> Result<Response, DriveError> {
    let target = resolve_and_verify_path(&state.root_dir, &path)?;
    let metadata = fs::metadata(&target)
        .await
        .map_err(|e| io_or_not_found(e, &path))?;
    if !metadata.is_file() {
        return Err(DriveError::NotFound(path));
    }

    debug!("Downloading file: {}", target.display());

    let file = fs::File::open(&target)
        .await
        .map_err(|e| io_or_not_found(e, &path))?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mime = mime_guess::from_path(&target)
        .first_or_octet_stream()
        .to_string();
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    let safe_filename = file_name.replace('"', "'");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_LENGTH, metadata.len().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", safe_filename),
            ),
        ],
        body,
    )
        .into_response())
}

/// GET /stream/{*path} - ranged streaming, always 206
pub async fn stream(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
    headers: HeaderMap,
) -> Result<RangedFile, DriveError> {
    let target = resolve_and_verify_path(&state.root_dir, &path)?;
    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    RangedFile::open(&target, range_header).await.map_err(|err| {
        if matches!(err, DriveError::NotFound(_)) {
            warn!("Stream target missing: {}", path);
            DriveError::NotFound(path)
        } else {
            err
        }
    })
}

/// POST /details
pub async fn details(
    State(state): State<AppState>,
    Form(form): Form<PathForm>,
) -> Result<Json<DetailsResponse>, DriveError> {
    let details = ops::entry_details(&state, &form.path).await?;

    Ok(Json(DetailsResponse {
        name: details.name,
        kind: match details.kind {
            EntryKind::Folder => "Folder",
            EntryKind::File => "File",
        },
        size: natural_size(details.size),
        created: format_time(details.created),
        modified: format_time(details.modified),
        path: form.path,
    }))
}
