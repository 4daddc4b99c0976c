use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use common_auth::JwksDocument;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct JwksState {
    document: Arc<JwksDocument>,
    fetches: Arc<AtomicUsize>,
}

async fn serve_jwks(State(state): State<JwksState>) -> Json<JwksDocument> {
    let count = state.fetches.fetch_add(1, Ordering::SeqCst) + 1;
    info!(fetches = count, "JWKS fetched");
    Json(state.document.as_ref().clone())
}

/// Routes serving `document` at `/` and `/jwks`.
pub fn router(document: JwksDocument, fetches: Arc<AtomicUsize>) -> Router {
    let state = JwksState {
        document: Arc::new(document),
        fetches,
    };
    Router::new()
        .route("/", get(serve_jwks))
        .route("/jwks", get(serve_jwks))
        .with_state(state)
}

/// Loopback key-discovery endpoint standing in for the identity providers.
pub struct JwksServer {
    addr: SocketAddr,
    fetches: Arc<AtomicUsize>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl JwksServer {
    pub async fn start(document: JwksDocument) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let fetches = Arc::new(AtomicUsize::new(0));
        let app = router(document, fetches.clone());
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = rx.await;
            });
            if let Err(err) = server.await {
                warn!(?err, "JWKS server error");
            }
        });

        Ok(Self {
            addr,
            fetches,
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    /// Base URL handed to the policy as its `jwksUri`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(?err, "JWKS server task did not stop cleanly"),
                Err(_) => {
                    warn!("JWKS server still draining connections; aborting");
                    handle.abort();
                }
            }
        }
    }
}

impl Drop for JwksServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
