//! `POST /upload`: file ingestion.
//!
//! Each file part of a multipart body is stored in the work dir as
//! `YYYYMMDDhhmmss-<name>` and announced in the room as a link, with the
//! stored name as the notification.

use std::fmt::Write as _;
use std::path::Path;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use chat_core::render;
use chrono::Local;
use metrics::counter;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::hub::Submission;
use crate::metrics::UPLOADS_TOTAL;
use crate::server::AppState;
use crate::websocket::session_token;

/// Why storing one uploaded file failed.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Writing the file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The multipart stream broke mid-file.
    #[error("multipart error: {0}")]
    Multipart(#[from] MultipartError),
}

/// Last path component of a client-supplied file name. `None` for names
/// that are empty or only point at a directory.
pub fn upload_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name.to_owned()),
    }
}

/// Name a file is stored under: local timestamp, dash, original name.
pub fn stored_name(original: &str) -> String {
    format!("{}-{original}", Local::now().format("%Y%m%d%H%M%S"))
}

async fn save(path: &Path, mut field: Field<'_>) -> Result<u64, UploadError> {
    let mut file = File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

pub(crate) async fn upload_handler(
    jar: CookieJar,
    headers: HeaderMap,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response {
    let Some(token) = session_token(&jar, &headers) else {
        counter!(UPLOADS_TOTAL, "status" => "unauthorized").increment(1);
        return (StatusCode::UNAUTHORIZED, "missing session token").into_response();
    };
    let identity = match state.resolver.resolve(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "upload rejected token");
            counter!(UPLOADS_TOTAL, "status" => "unauthorized").increment(1);
            return (StatusCode::UNAUTHORIZED, "unknown session token").into_response();
        }
    };

    let mut receipt = String::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "upload: cannot read part");
                counter!(UPLOADS_TOTAL, "status" => "bad_request").increment(1);
                return (StatusCode::BAD_REQUEST, "cannot read part").into_response();
            }
        };
        let Some(original) = field.file_name().and_then(upload_name) else {
            debug!(field = ?field.name(), "upload: skipping non-file part");
            continue;
        };

        let stored = stored_name(&original);
        let path = state.config.work_dir.join(&stored);
        let written = match save(&path, field).await {
            Ok(written) => written,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "upload: cannot store file");
                let _ = tokio::fs::remove_file(&path).await;
                counter!(UPLOADS_TOTAL, "status" => "failed").increment(1);
                return (StatusCode::BAD_REQUEST, "cannot store file").into_response();
            }
        };
        let _ = writeln!(receipt, "{written} bytes sent");
        info!(name = %identity.name, file = %stored, bytes = written, "file uploaded");
        counter!(UPLOADS_TOTAL, "status" => "stored").increment(1);

        let submission = Submission::markup(
            identity.token.as_str(),
            identity.name.as_str(),
            render::upload_link(&stored, &original),
            format!("file: {stored}"),
        );
        if state.hub.inject(submission).await.is_err() {
            return (StatusCode::SERVICE_UNAVAILABLE, "hub unavailable").into_response();
        }
    }

    if receipt.is_empty() {
        counter!(UPLOADS_TOTAL, "status" => "empty").increment(1);
        return (StatusCode::BAD_REQUEST, "no file in upload").into_response();
    }
    (StatusCode::OK, receipt).into_response()
}
