use crate::dashboard::{self, StackRow};
use crate::error::json_reply;
use crate::gateway::Gateway;
use crate::router::{self, Route};
use crate::store::{StackDefinition, StoreError};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Version information for the gateway
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";

/// Header htmx sets on its requests
const HX_REQUEST: &str = "hx-request";

/// Largest form body accepted by the dashboard endpoints
const MAX_FORM_BYTES: u64 = 64 * 1024;

const FORM_TOO_LARGE: &str = "Formulario demasiado grande.";

/// Helper to create a simple response - infallible with valid StatusCode
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Helper to create a JSON response
fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// The HTTP front of the gateway: dashboard, wake endpoints and the
/// host-based catch-all
pub struct GatewayServer {
    bind_addr: SocketAddr,
    gateway: Arc<Gateway>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    pub fn new(
        bind_addr: SocketAddr,
        gateway: Arc<Gateway>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            gateway,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr().unwrap_or(self.bind_addr);
        info!(addr = %addr, "Gateway listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let gateway = Arc::clone(&self.gateway);
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, addr, gateway).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection<S>(
    stream: S,
    addr: SocketAddr,
    gateway: Arc<Gateway>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let gateway = Arc::clone(&gateway);
        async move { handle_request(req, gateway, addr).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<Gateway>,
    client_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    // Generate or propagate request ID
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let route = router::route(req.method(), req.uri().path());
    debug!(
        method = %req.method(),
        uri = %req.uri(),
        client = %client_addr,
        request_id = %request_id,
        ?route,
        "Incoming request"
    );

    let mut resp = match route {
        Route::Health => response(StatusCode::OK, "ok"),

        Route::Version => {
            let version_info = serde_json::json!({
                "name": PKG_NAME,
                "version": VERSION,
            });
            json_response(StatusCode::OK, version_info.to_string())
        }

        Route::ListStacks => list_stacks(&gateway),

        Route::Dashboard => {
            let html = if is_htmx(&req) {
                render_table(&gateway, None)
            } else {
                render_page(&gateway, None)
            };
            dashboard::html_response(StatusCode::OK, html)
        }

        Route::AddStack => {
            let htmx = is_htmx(&req);
            let message = match read_form(req).await {
                Ok(mut form) => {
                    let stack = StackDefinition::new(
                        form.remove("name").unwrap_or_default(),
                        form.remove("path").unwrap_or_default(),
                        form.remove("project").unwrap_or_default(),
                    );
                    let name = stack.name.trim().to_string();
                    mutation_message(
                        gateway.store().add(stack).await,
                        format!("Stack '{}' añadido.", name),
                    )
                }
                Err(message) => message,
            };
            dashboard_reply(&gateway, htmx, &message)
        }

        Route::EditStack(name) => {
            let htmx = is_htmx(&req);
            let message = match read_form(req).await {
                Ok(form) => {
                    let path = form.get("path").map(String::as_str).unwrap_or_default();
                    let project = form.get("project").map(String::as_str).unwrap_or_default();
                    mutation_message(
                        gateway.store().edit(&name, path, project).await,
                        format!("Stack '{}' actualizado correctamente.", name),
                    )
                }
                Err(message) => message,
            };
            dashboard_reply(&gateway, htmx, &message)
        }

        Route::DeleteStack(name) => {
            let htmx = is_htmx(&req);
            let message = mutation_message(
                gateway.store().delete(&name).await,
                format!("Stack '{}' eliminado.", name),
            );
            dashboard_reply(&gateway, htmx, &message)
        }

        Route::Wake(name) => {
            let outcome = gateway.wake_named(&name).await;
            if is_htmx(&req) {
                dashboard_reply(&gateway, true, &outcome.message())
            } else {
                json_reply(&outcome.reply())
            }
        }

        Route::CatchAll => {
            let host = req
                .headers()
                .get(hyper::header::HOST)
                .and_then(|h| h.to_str().ok())
                // HTTP/2 requests carry the host in the URI authority
                .or_else(|| req.uri().host());
            let outcome = gateway.wake_host(host).await;
            json_reply(&outcome.reply())
        }
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }

    Ok(resp)
}

fn is_htmx(req: &Request<Incoming>) -> bool {
    req.headers()
        .get(HX_REQUEST)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn list_stacks(gateway: &Gateway) -> Response<Full<Bytes>> {
    match gateway.stacks_with_state() {
        Ok(stacks) => {
            let stack_list: Vec<serde_json::Value> = stacks
                .into_iter()
                .map(|(stack, state)| {
                    serde_json::json!({
                        "name": stack.name,
                        "path": stack.path,
                        "project": stack.project,
                        "state": state,
                    })
                })
                .collect();
            let body = serde_json::json!({
                "stacks": stack_list,
                "count": stack_list.len(),
            });
            json_response(StatusCode::OK, body.to_string())
        }
        Err(e) => {
            error!(error = %e, "Failed to read stack store");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "No se pudo leer la configuración" }).to_string(),
            )
        }
    }
}

/// Message for a finished store mutation
fn mutation_message(result: Result<(), StoreError>, success: String) -> String {
    match result {
        Ok(()) => success,
        Err(e @ (StoreError::Io(_) | StoreError::Parse(_))) => {
            error!(error = %e, "Stack store update failed");
            e.to_string()
        }
        Err(e) => {
            debug!(error = %e, "Stack store update rejected");
            e.to_string()
        }
    }
}

/// Dashboard answer after a form post: the table fragment for htmx,
/// the whole page otherwise
fn dashboard_reply(gateway: &Gateway, htmx: bool, message: &str) -> Response<Full<Bytes>> {
    let html = if htmx {
        render_table(gateway, Some(message))
    } else {
        render_page(gateway, Some(message))
    };
    dashboard::html_response(StatusCode::OK, html)
}

fn render_page(gateway: &Gateway, message: Option<&str>) -> String {
    with_rows(gateway, message, dashboard::render_page)
}

fn render_table(gateway: &Gateway, message: Option<&str>) -> String {
    with_rows(gateway, message, dashboard::render_table)
}

fn with_rows(
    gateway: &Gateway,
    message: Option<&str>,
    render: fn(&[StackRow<'_>], Option<&str>) -> String,
) -> String {
    let (stacks, message) = match gateway.stacks_with_state() {
        Ok(stacks) => (stacks, message.map(String::from)),
        Err(e) => {
            // Show an empty table rather than failing the page
            error!(error = %e, "Failed to read stack store");
            let notice = match message {
                Some(message) => format!("{} ({})", message, e),
                None => e.to_string(),
            };
            (Vec::new(), Some(notice))
        }
    };

    let rows: Vec<StackRow<'_>> = stacks
        .iter()
        .map(|(stack, state)| StackRow {
            stack,
            state: *state,
        })
        .collect();
    render(&rows, message.as_deref())
}

/// Read an `application/x-www-form-urlencoded` body of at most
/// `MAX_FORM_BYTES`, whether or not a Content-Length was sent.
/// Errors come back as the message to show.
async fn read_form<B>(req: Request<B>) -> Result<HashMap<String, String>, String>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let declared_too_large = req
        .headers()
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|len| len > MAX_FORM_BYTES)
        .unwrap_or(false);
    if declared_too_large {
        warn!("Rejected oversized form body");
        return Err(FORM_TOO_LARGE.to_string());
    }

    let body = Limited::new(req.into_body(), MAX_FORM_BYTES as usize)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                warn!("Rejected oversized form body");
                FORM_TOO_LARGE.to_string()
            } else {
                debug!(error = %e, "Failed to read form body");
                "No se pudo leer el formulario.".to_string()
            }
        })?
        .to_bytes();

    Ok(parse_form(&body))
}

/// Decode `a=1&b=two+words` pairs; the last value of a repeated key wins
pub fn parse_form(body: &[u8]) -> HashMap<String, String> {
    let body = String::from_utf8_lossy(body);
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(&key.replace('+', " ")).ok()?.into_owned();
            let value = urlencoding::decode(&value.replace('+', " ")).ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}
