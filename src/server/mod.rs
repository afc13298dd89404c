//! JSON HTTP API over a [`TaskOrchestrator`].
//!
//! Requests are served by a fixed pool of blocking worker threads. Workers
//! only call the non-blocking orchestrator operations, so no runtime is
//! needed on these threads.

use crate::orchestrator::TaskOrchestrator;
use crate::task::{CreateTaskRequest, TaskId};
use serde_json::{Value, json};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server};

/// Largest accepted request body.
const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Failed to spawn HTTP worker: {0}")]
    Worker(#[source] io::Error),
}

/// Why a request body was not handed to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyError {
    TooLarge,
    Malformed,
}

impl BodyError {
    fn response(self) -> ApiResponse {
        match self {
            Self::TooLarge => ApiResponse::error(413, "request body too large"),
            Self::Malformed => ApiResponse::error(400, "request body is not valid UTF-8"),
        }
    }
}

/// Status code and JSON body of an API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self::new(status, json!({ "error": message.into() }))
    }
}

/// Route one request. Body errors only matter to routes that read a body.
pub fn route(
    orchestrator: &TaskOrchestrator,
    method: &Method,
    url: &str,
    body: Result<&str, BodyError>,
) -> ApiResponse {
    let path = url.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        (Method::Get, ["health"]) => ApiResponse::new(200, json!({ "status": "ok" })),

        (Method::Post, ["api", "tasks"]) => {
            let body = match body {
                Ok(body) => body,
                Err(e) => return e.response(),
            };
            match serde_json::from_str::<CreateTaskRequest>(body) {
                Ok(request) => {
                    let id = orchestrator.create(request);
                    ApiResponse::new(202, json!({ "id": id }))
                }
                Err(e) => ApiResponse::error(400, format!("invalid task request: {e}")),
            }
        }

        (Method::Get, ["api", "tasks", raw_id]) => match raw_id.parse::<TaskId>() {
            Ok(id) => match orchestrator.get_task_by_id(id) {
                Some(task) => match serde_json::to_value(&task) {
                    Ok(body) => ApiResponse::new(200, body),
                    Err(e) => ApiResponse::error(500, e.to_string()),
                },
                None => ApiResponse::error(404, "task not found"),
            },
            Err(_) => ApiResponse::error(400, "task id must be an integer"),
        },

        (_, ["health"] | ["api", "tasks"] | ["api", "tasks", _]) => {
            ApiResponse::error(405, "method not allowed")
        }

        _ => ApiResponse::error(404, "not found"),
    }
}

/// Running HTTP API. Call [`ApiServer::stop`] to shut it down.
pub struct ApiServer {
    server: Arc<Server>,
    workers: Vec<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl ApiServer {
    pub fn start(
        listen: &str,
        workers: usize,
        orchestrator: Arc<TaskOrchestrator>,
    ) -> Result<Self, ServerError> {
        let server = Server::http(listen).map_err(|e| ServerError::Bind {
            addr: listen.to_string(),
            reason: e.to_string(),
        })?;
        let addr = server.server_addr().to_ip().ok_or_else(|| ServerError::Bind {
            addr: listen.to_string(),
            reason: "not an IP listener".to_string(),
        })?;

        let server = Arc::new(server);
        let stopping = Arc::new(AtomicBool::new(false));
        let workers = spawn_workers(&server, &stopping, workers.max(1), |n| {
            let server = Arc::clone(&server);
            let stopping = Arc::clone(&stopping);
            let orchestrator = Arc::clone(&orchestrator);
            std::thread::Builder::new()
                .name(format!("authflow-http-{n}"))
                .spawn(move || serve(&server, &stopping, &orchestrator))
        })?;

        tracing::info!(%addr, workers = workers.len(), "HTTP API listening");
        Ok(Self {
            server,
            workers,
            stopping,
            addr,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting requests and join the worker threads.
    pub fn stop(self) {
        shutdown_workers(&self.server, &self.stopping, self.workers);
        tracing::info!(addr = %self.addr, "HTTP API stopped");
    }
}

/// Spawn `count` workers. If one fails to spawn, the ones already running
/// are stopped and joined before the error is returned.
fn spawn_workers(
    server: &Server,
    stopping: &AtomicBool,
    count: usize,
    mut spawn: impl FnMut(usize) -> io::Result<JoinHandle<()>>,
) -> Result<Vec<JoinHandle<()>>, ServerError> {
    let mut workers = Vec::with_capacity(count);
    for n in 0..count {
        match spawn(n) {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                shutdown_workers(server, stopping, workers);
                return Err(ServerError::Worker(e));
            }
        }
    }
    Ok(workers)
}

fn shutdown_workers(server: &Server, stopping: &AtomicBool, workers: Vec<JoinHandle<()>>) {
    stopping.store(true, Ordering::SeqCst);
    // Each unblock wakes one worker.
    for _ in &workers {
        server.unblock();
    }
    for worker in workers {
        let _ = worker.join();
    }
}

fn serve(server: &Server, stopping: &AtomicBool, orchestrator: &TaskOrchestrator) {
    loop {
        let request = match server.recv() {
            Ok(request) => request,
            Err(_) if stopping.load(Ordering::SeqCst) => return,
            Err(e) => {
                tracing::warn!("HTTP accept failed: {e}");
                continue;
            }
        };
        handle(request, orchestrator);
    }
}

fn handle(mut request: Request, orchestrator: &TaskOrchestrator) {
    let body = decode_body(request.as_reader());
    let response = route(
        orchestrator,
        request.method(),
        request.url(),
        body.as_deref().map_err(|e| *e),
    );
    tracing::debug!(
        method = %request.method(),
        url = request.url(),
        status = response.status,
        "HTTP request"
    );

    let mut reply = Response::from_string(response.body.to_string()).with_status_code(response.status);
    if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
        reply = reply.with_header(header);
    }
    if let Err(e) = request.respond(reply) {
        tracing::debug!("Failed to write HTTP response: {e}");
    }
}

fn decode_body(reader: impl Read) -> Result<String, BodyError> {
    let mut bytes = Vec::new();
    reader
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut bytes)
        .map_err(|_| BodyError::Malformed)?;
    if bytes.len() as u64 > MAX_BODY_BYTES {
        return Err(BodyError::TooLarge);
    }
    String::from_utf8(bytes).map_err(|_| BodyError::Malformed)
}
