//! Backup endpoint - receives images offloaded by capture devices
//!
//! - `POST /upload`: multipart form with a `file` field and an optional `dir` field
//! - `GET /healthcheck`: liveness probe
//! - `GET /`: stored images, oldest first

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    BoxError, Json, Router,
};
use futures::{Stream, TryStreamExt};
use serde_json::{json, Value};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use timelapse::config::BackupServerConfig;
use timelapse::domain::naming::{list_images, ListOrder};
use tokio::{fs::File, io::BufWriter};
use tokio_util::io::StreamReader;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    upload_dir: Arc<PathBuf>,
}

#[tokio::main]
async fn main() {
    let config = BackupServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = tokio::fs::create_dir_all(&config.upload_dir).await {
        tracing::error!(error = %e, dir = %config.upload_dir.display(), "Cannot create upload directory");
        std::process::exit(1);
    }

    let app = router(AppState {
        upload_dir: Arc::new(config.upload_dir.clone()),
    });

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.addr, config.port))
        .await
        .expect("Failed to bind TCP listener");
    info!("Listening at {}:{}", config.addr, config.port);
    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/upload", post(upload_image))
        .route("/healthcheck", get(healthcheck))
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthcheck() -> Json<Value> {
    Json(json!({}))
}

// Accepts one image per request; `dir` must come before `file` to take effect.
async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, String)> {
    let mut dir = PathBuf::new();
    let mut stored = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        match field.name() {
            Some("dir") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
                dir = PathBuf::from(text);
                if !path_is_valid(&dir) {
                    return Err((StatusCode::BAD_REQUEST, "Invalid path".to_owned()));
                }
            }
            Some("file") => {
                let Some(file_name) = field.file_name().map(str::to_owned) else {
                    return Err((StatusCode::BAD_REQUEST, "Missing file name".to_owned()));
                };
                if !file_name_is_valid(&file_name) {
                    return Err((StatusCode::BAD_REQUEST, "Invalid file name".to_owned()));
                }

                let target_dir = state.upload_dir.join(&dir);
                tokio::fs::create_dir_all(&target_dir)
                    .await
                    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
                let path = target_dir.join(&file_name);
                stream_to_file(&path, field).await?;
                info!(path = %path.display(), "Stored image");
                stored = Some(dir.join(&file_name));
            }
            _ => continue,
        }
    }

    match stored {
        Some(path) => Ok(Json(json!({ "stored": path }))),
        None => {
            warn!("Upload without a file field");
            Err((StatusCode::BAD_REQUEST, "Missing file field".to_owned()))
        }
    }
}

// Save a `Stream` to a file, replacing it only once fully written
async fn stream_to_file<S, E>(path: &Path, stream: S) -> Result<(), (StatusCode, String)>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let partial = path.with_extension("upload");
    async {
        let body_with_io_error = stream.map_err(io::Error::other);
        let body_reader = StreamReader::new(body_with_io_error);
        futures::pin_mut!(body_reader);

        let mut file = BufWriter::new(File::create(&partial).await?);
        tokio::io::copy(&mut body_reader, &mut file).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        tokio::fs::rename(&partial, path).await?;

        Ok::<_, io::Error>(())
    }
    .await
    .map_err(|err| {
        let _ = std::fs::remove_file(&partial);
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })
}

/// Relative directories only, without `..`.
fn path_is_valid(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn file_name_is_valid(name: &str) -> bool {
    let path = Path::new(name);
    matches!(
        path.components().collect::<Vec<_>>().as_slice(),
        [Component::Normal(_)]
    )
}

async fn root(State(state): State<AppState>) -> Html<String> {
    let root = state.upload_dir.as_ref().clone();
    let files = tokio::task::spawn_blocking(move || list_images(&root, ListOrder::Ascending))
        .await
        .unwrap_or_default();

    let file_list = files
        .iter()
        .filter_map(|path| path.strip_prefix(state.upload_dir.as_path()).ok())
        .map(|file| format!("<li>{}</li>", file.display()))
        .collect::<String>();

    Html(format!(
        r#"
        <!doctype html>
        <html>
            <head>
                <title>Time-lapse backup</title>
            </head>
            <body>
                <h1>Stored images ({}):</h1>
                <ul>{}</ul>
            </body>
        </html>
        "#,
        files.len(),
        file_list
    ))
}
