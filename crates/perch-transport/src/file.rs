//! Sending files from disk.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use perch_core::http::StatusCode;
use perch_core::http::header::{self, HeaderValue};
use perch_core::{BoxError, FileSender, RequestContext, ResponseBody, SendOptions};
use thiserror::Error;
use tracing::debug;

/// Why a file could not be sent.
#[derive(Debug, Error)]
pub enum SendError {
    /// The path tries to leave its root.
    #[error("path {0:?} is not allowed")]
    Forbidden(String),

    /// Nothing readable at the resolved path.
    #[error("file {0:?} not found")]
    NotFound(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A [`FileSender`] on top of `tokio::fs`.
///
/// Paths are resolved against [`SendOptions::root`], falling back to the
/// sender's own root. Parent-directory components are always rejected.
#[derive(Debug, Clone, Default)]
pub struct FsFileSender {
    root: Option<PathBuf>,
}

impl FsFileSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative paths under `root` unless a send overrides it.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &str, options: &SendOptions) -> Result<PathBuf, SendError> {
        let forbidden = || SendError::Forbidden(path.to_string());
        match options.root.as_ref().or(self.root.as_ref()) {
            Some(root) => {
                let mut resolved = root.clone();
                for component in Path::new(path.trim_start_matches('/')).components() {
                    match component {
                        Component::Normal(part) => resolved.push(part),
                        Component::CurDir => {}
                        _ => return Err(forbidden()),
                    }
                }
                Ok(resolved)
            }
            None => {
                let path = Path::new(path);
                if path.components().any(|c| c == Component::ParentDir) {
                    return Err(forbidden());
                }
                Ok(path.to_path_buf())
            }
        }
    }

    async fn load(&self, path: &str, options: &SendOptions) -> Result<(PathBuf, Vec<u8>), SendError> {
        let resolved = self.resolve(path, options)?;
        let metadata = match tokio::fs::metadata(&resolved).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SendError::NotFound(resolved));
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(SendError::NotFound(resolved));
        }
        let data = tokio::fs::read(&resolved).await?;
        Ok((resolved, data))
    }
}

#[async_trait]
impl FileSender for FsFileSender {
    async fn send(
        &self,
        ctx: &RequestContext,
        path: &str,
        options: &SendOptions,
    ) -> Result<(), BoxError> {
        let (resolved, data) = self.load(path, options).await?;
        debug!(path = %resolved.display(), bytes = data.len(), "Sending file");

        if let Some(cache_control) = cache_control(options) {
            ctx.set_header(header::CACHE_CONTROL, HeaderValue::try_from(cache_control)?);
        }
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| content_type(&resolved).to_string());
        ctx.set_status(StatusCode::OK);
        ctx.set_content_type(content_type);
        ctx.set_body(ResponseBody::Bytes(data));
        Ok(())
    }
}

fn cache_control(options: &SendOptions) -> Option<String> {
    let max_age = options.max_age?;
    Some(if options.immutable {
        format!("max-age={max_age}, immutable")
    } else {
        format!("max-age={max_age}")
    })
}

/// Guesses a content type from the file extension.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" | "md" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}
