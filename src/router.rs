//! Maps inbound requests to gateway routes and stack names

use hyper::Method;

/// Maximum hostname length per DNS specification
const MAX_HOSTNAME_LEN: usize = 253;

/// Leading label of a Host header value, lower-cased.
///
/// The port is dropped. Returns `None` for empty, over-long, or
/// suspicious values (anything but alphanumerics, hyphen, underscore and
/// dot) so they never reach logs or the store lookup.
pub fn host_label(host: &str) -> Option<String> {
    let hostname = host.split(':').next()?.trim();

    if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
        return None;
    }

    if !hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return None;
    }

    hostname.split('.').next().map(|label| label.to_ascii_lowercase())
}

/// Endpoint selected for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    Version,
    ListStacks,
    Dashboard,
    AddStack,
    EditStack(String),
    DeleteStack(String),
    Wake(String),
    /// Activation keyed by the Host header
    CatchAll,
}

/// Pick the route for a method and path. Anything that is not a gateway
/// endpoint falls through to host-based activation.
pub fn route(method: &Method, path: &str) -> Route {
    match (method, path) {
        (&Method::GET, "/health") => Route::Health,
        (&Method::GET, "/version") => Route::Version,
        (&Method::GET, "/stacks") => Route::ListStacks,
        (&Method::GET, "/dashboard") | (&Method::GET, "/dashboard/") => Route::Dashboard,
        (&Method::POST, "/add") => Route::AddStack,
        (&Method::POST, path) if path.starts_with("/edit/") => {
            match path_name(path, "/edit/") {
                Some(name) => Route::EditStack(name),
                None => Route::CatchAll,
            }
        }
        (&Method::POST, path) if path.starts_with("/delete/") => {
            match path_name(path, "/delete/") {
                Some(name) => Route::DeleteStack(name),
                None => Route::CatchAll,
            }
        }
        (_, path) if path.starts_with("/wake/") => match path_name(path, "/wake/") {
            Some(name) => Route::Wake(name),
            None => Route::CatchAll,
        },
        _ => Route::CatchAll,
    }
}

/// Single percent-decoded path segment after `prefix`
fn path_name(path: &str, prefix: &str) -> Option<String> {
    let raw = path.strip_prefix(prefix)?.trim_end_matches('/');
    if raw.is_empty() || raw.contains('/') {
        return None;
    }
    urlencoding::decode(raw).ok().map(|name| name.into_owned())
}
