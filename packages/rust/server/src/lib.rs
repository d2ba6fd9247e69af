//! HTTP front end for LeadScout.
//!
//! Exposes each pipeline step as a JSON endpoint so a browser UI can drive
//! a run one step at a time. Every session gets its own pipeline.
//!
//! `tiny_http` blocks on `recv`, so [`serve`] runs on a blocking thread and
//! hands each request to the async [`routes::App`] through a runtime handle.

pub mod input;
pub mod routes;
pub mod session;

use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::runtime::Handle;
use tracing::{error, info, warn};

use leadscout_shared::{LeadScoutError, Result, ServerConfig};

use routes::{ApiResponse, App};

/// Serve `app` on the configured address until the listener fails.
///
/// Requests are handled by a fixed pool of `config.workers` threads sharing
/// one listener. Call from a blocking context (`spawn_blocking` or a plain
/// thread).
pub fn serve(config: &ServerConfig, app: Arc<App>, handle: Handle) -> Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);
    let server = tiny_http::Server::http(&addr)
        .map_err(|e| LeadScoutError::config(format!("cannot listen on {addr}: {e}")))?;
    let server = Arc::new(server);
    let workers = config.workers.max(1);
    info!(%addr, workers, "server listening");

    let pool = spawn_workers(&server, workers, &app, &handle)?;
    for worker in pool {
        if worker.join().is_err() {
            error!("server worker panicked");
        }
    }
    Ok(())
}

/// Start `count` threads that pull requests off `server` until it is
/// unblocked or closed.
pub(crate) fn spawn_workers(
    server: &Arc<tiny_http::Server>,
    count: usize,
    app: &Arc<App>,
    handle: &Handle,
) -> Result<Vec<JoinHandle<()>>> {
    let mut pool = Vec::with_capacity(count);
    for worker in 0..count {
        let server = server.clone();
        let app = app.clone();
        let handle = handle.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("leadscout-http-{worker}"))
            .spawn(move || {
                for request in server.incoming_requests() {
                    respond(request, &app, &handle);
                }
            })
            .map_err(|e| LeadScoutError::config(format!("cannot start server worker: {e}")))?;
        pool.push(spawned);
    }
    Ok(pool)
}

fn respond(mut request: tiny_http::Request, app: &App, handle: &Handle) {
    let method = request.method().to_string();
    let url = request.url().to_string();

    let mut body = String::new();
    let response = match request.as_reader().read_to_string(&mut body) {
        Ok(_) => handle.block_on(app.handle(&method, &url, &body)),
        Err(e) => ApiResponse::from_error(
            &LeadScoutError::user_input(format!("unreadable request body: {e}")),
            None,
        ),
    };

    let mut http = tiny_http::Response::from_string(response.body_text())
        .with_status_code(tiny_http::StatusCode(response.status));
    if let Ok(header) = tiny_http::Header::from_bytes("Content-Type", "application/json") {
        http = http.with_header(header);
    }
    if let Some(name) = &response.attachment {
        let value = format!("attachment; filename=\"{name}\"");
        if let Ok(header) = tiny_http::Header::from_bytes("Content-Disposition", value.as_bytes()) {
            http = http.with_header(header);
        }
    }

    if let Err(e) = request.respond(http) {
        warn!(%method, %url, error = %e, "failed to write response");
    }
}
