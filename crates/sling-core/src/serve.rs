//! Static preview server.
//!
//! Serves the output directory over HTTP while builds run. The server is
//! started once and never restarted on rebuild.

use axum::extract::Request;
use axum::handler::HandlerWithoutStateExt;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

const NOT_FOUND_BODY: &str = "Error 404: File not found";

/// Preview server error.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to bind preview server to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Static file server for the output directory.
#[derive(Debug, Clone)]
pub struct PreviewServer {
    webroot: PathBuf,
    port: u16,
}

impl PreviewServer {
    /// `port` 0 picks a free port.
    #[must_use]
    pub fn new(webroot: PathBuf, port: u16) -> Self {
        Self { webroot, port }
    }

    /// Router serving `webroot`, with the powered-by header and request logging.
    pub fn router(&self) -> Router {
        let files =
            ServeDir::new(&self.webroot).not_found_service(not_found.into_service());

        Router::new()
            .fallback_service(files)
            .layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static("x-powered-by"),
                HeaderValue::from_static("sling"),
            ))
            .layer(middleware::from_fn(log_request))
    }

    /// Bind and serve in a background task.
    pub async fn start(&self) -> Result<ServerHandle, ServeError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServeError::Bind { addr, source })?;

        let router = self.router();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                    tracing::debug!("preview server shutting down");
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "preview server failed");
            }
        });

        tracing::info!(
            port = local_addr.port(),
            webroot = %self.webroot.display(),
            "server listening on port {}",
            local_addr.port()
        );

        Ok(ServerHandle {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }
}

/// Running preview server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "preview server task ended abnormally");
        }
        tracing::info!("preview server stopped");
    }
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain")],
        NOT_FOUND_BODY,
    )
}

async fn log_request(request: Request, next: Next) -> Response {
    tracing::info!(method = %request.method(), "request received for {}", request.uri());
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[tokio::test]
    #[serial]
    async fn test_serves_files_with_header() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bundle.js"), "console.log(1);\n").unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();

        let handle = PreviewServer::new(dir.path().to_path_buf(), 0)
            .start()
            .await
            .unwrap();
        let base = format!("http://{}", handle.local_addr());

        let resp = reqwest::get(format!("{base}/bundle.js")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["x-powered-by"], "sling");
        assert_eq!(resp.text().await.unwrap(), "console.log(1);\n");

        let index = reqwest::get(format!("{base}/")).await.unwrap();
        assert_eq!(index.status(), 200);
        assert_eq!(index.text().await.unwrap(), "<html></html>");

        handle.stop().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_file_is_plain_404() {
        let dir = tempdir().unwrap();
        let handle = PreviewServer::new(dir.path().to_path_buf(), 0)
            .start()
            .await
            .unwrap();

        let resp = reqwest::get(format!("http://{}/nope.js", handle.local_addr()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        assert_eq!(resp.headers()["content-type"], "text/plain");
        assert_eq!(resp.headers()["x-powered-by"], "sling");
        assert_eq!(resp.text().await.unwrap(), NOT_FOUND_BODY);

        handle.stop().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_port_in_use() {
        let dir = tempdir().unwrap();
        let first = PreviewServer::new(dir.path().to_path_buf(), 0)
            .start()
            .await
            .unwrap();
        let port = first.local_addr().port();

        let err = PreviewServer::new(dir.path().to_path_buf(), port)
            .start()
            .await
            .unwrap_err();
        assert!(matches!(err, ServeError::Bind { .. }));

        first.stop().await;
    }
}
