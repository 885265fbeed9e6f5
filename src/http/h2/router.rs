//! Request routing
//!
//! The connection hands every completed request to a [`RequestHandler`].
//! [`Router`] is the stock implementation: exact `(method, path)` matches,
//! optional server push resources per route, and an error handler for
//! requests nothing matches.

use super::error::{Error, ErrorCode, Result};
use super::hpack::HeaderField;
use super::stream::StreamId;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

/// A request assembled from one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// `:method`
    pub method: String,
    /// `:path`
    pub path: String,
    /// `:scheme`, if sent
    pub scheme: Option<String>,
    /// `:authority`, if sent
    pub authority: Option<String>,
    /// All header fields, pseudo-headers included, in receipt order
    pub headers: Vec<HeaderField>,
    /// Concatenated DATA payloads; `None` if the request carried no body
    pub body: Option<Bytes>,
}

impl Request {
    /// Build a request from a stream's header list and body
    ///
    /// A missing `:method` or `:path` is a stream error PROTOCOL_ERROR.
    pub fn from_parts(stream_id: StreamId, headers: Vec<HeaderField>, body: Bytes) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .find(|f| f.name == name)
                .map(|f| f.value.clone())
        };

        let method = find(":method").ok_or_else(|| {
            Error::stream(stream_id, ErrorCode::ProtocolError, "request without :method")
        })?;
        let path = find(":path").ok_or_else(|| {
            Error::stream(stream_id, ErrorCode::ProtocolError, "request without :path")
        })?;

        Ok(Request {
            method,
            path,
            scheme: find(":scheme"),
            authority: find(":authority"),
            body: (!body.is_empty()).then_some(body),
            headers,
        })
    }

    /// Synthesized GET-style request for a pushed resource
    pub fn pushed(method: &str, path: &str, parent: &Request) -> Self {
        let scheme = parent.scheme.clone().unwrap_or_else(|| "http".to_string());
        let authority = parent.authority.clone().unwrap_or_default();
        let headers = vec![
            HeaderField::new(":method", method),
            HeaderField::new(":scheme", scheme.as_str()),
            HeaderField::new(":path", path),
            HeaderField::new(":authority", authority.as_str()),
        ];

        Request {
            method: method.to_string(),
            path: path.to_string(),
            scheme: Some(scheme),
            authority: Some(authority),
            headers,
            body: None,
        }
    }

    /// Value of the first header with the given name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// A response to send on a stream
///
/// `headers: None` lets the stream pick the status: 200 with a body, 404
/// without one. The default response (no headers, no body) is therefore a
/// bare 404.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Response header fields; `:status` is added if missing
    pub headers: Option<Vec<HeaderField>>,
    /// Response body
    pub body: Option<Bytes>,
    /// Resources to push alongside this response
    pub pushes: Vec<PushedResponse>,
}

impl Response {
    /// Create an empty response (sent as 404)
    pub fn new() -> Self {
        Response::default()
    }

    /// Response carrying `body` with the default status
    pub fn with_body(body: impl Into<Bytes>) -> Self {
        Response {
            body: Some(body.into()),
            ..Response::default()
        }
    }

    /// Response with an explicit status and no other headers
    pub fn with_status(status: u16) -> Self {
        Response {
            headers: Some(vec![HeaderField::new(":status", status.to_string())]),
            ..Response::default()
        }
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Append a header field
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Vec::new)
            .push(HeaderField::new(name, value));
        self
    }

    /// The `:status` value, if headers are set and carry one
    pub fn status(&self) -> Option<&str> {
        self.headers
            .as_ref()?
            .iter()
            .find(|f| f.name == ":status")
            .map(|f| f.value.as_str())
    }
}

/// One pushed resource: the promised request and its response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedResponse {
    /// Request header fields carried in PUSH_PROMISE
    pub request_headers: Vec<HeaderField>,
    /// Response for the promised stream
    pub response: Response,
}

/// Something that turns a request into a response
pub trait Handler: Send + Sync {
    /// Produce the response for `request`
    fn call(&self, request: &Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Response + Send + Sync,
{
    fn call(&self, request: &Request) -> Response {
        self(request)
    }
}

/// The seam between a connection and the application
pub trait RequestHandler: Send + Sync {
    /// Handle one completed request
    ///
    /// Called once per request. A default [`Response`] is sent as 404.
    fn handle_request(&self, request: &Request) -> Response;
}

/// A resource pushed whenever its parent route is requested
pub struct PushResource {
    method: String,
    path: String,
    handler: Box<dyn Handler>,
}

impl PushResource {
    /// Create a push resource served by `handler`
    pub fn new(method: impl Into<String>, path: impl Into<String>, handler: impl Handler + 'static) -> Self {
        PushResource {
            method: method.into(),
            path: path.into(),
            handler: Box::new(handler),
        }
    }
}

impl fmt::Debug for PushResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushResource")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

struct Route {
    handler: Box<dyn Handler>,
    pushes: Vec<PushResource>,
}

/// Exact-match router
#[derive(Default)]
pub struct Router {
    routes: HashMap<(String, String), Route>,
    error_handler: Option<Box<dyn Handler>>,
}

impl Router {
    /// Create an empty router
    pub fn new() -> Self {
        Router::default()
    }

    /// Register a handler for `method` and `path`
    pub fn route(
        &mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> &mut Self {
        self.route_with_push(method, path, handler, Vec::new())
    }

    /// Register a handler together with resources to push on every request
    pub fn route_with_push(
        &mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        handler: impl Handler + 'static,
        pushes: Vec<PushResource>,
    ) -> &mut Self {
        self.routes.insert(
            (method.into(), path.into()),
            Route {
                handler: Box::new(handler),
                pushes,
            },
        );
        self
    }

    /// Handler for requests no route matches
    ///
    /// Its responses default to status 404 when they set no headers.
    pub fn error_handler(&mut self, handler: impl Handler + 'static) -> &mut Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if no routes are registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RequestHandler for Router {
    fn handle_request(&self, request: &Request) -> Response {
        let key = (request.method.clone(), request.path.clone());

        let Some(route) = self.routes.get(&key) else {
            return match &self.error_handler {
                Some(handler) => {
                    let mut response = handler.call(request);
                    if response.headers.is_none() {
                        response.headers = Some(vec![HeaderField::new(":status", "404")]);
                    }
                    response
                }
                None => Response::new(),
            };
        };

        let mut response = route.handler.call(request);
        for push in &route.pushes {
            let pushed_request = Request::pushed(&push.method, &push.path, request);
            response.pushes.push(PushedResponse {
                response: push.handler.call(&pushed_request),
                request_headers: pushed_request.headers,
            });
        }
        response
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request {
        Request::from_parts(
            1,
            vec![
                HeaderField::new(":method", "GET"),
                HeaderField::new(":scheme", "https"),
                HeaderField::new(":path", path),
                HeaderField::new(":authority", "example.com"),
            ],
            Bytes::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_request_from_parts() {
        let request = get("/index.html");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/index.html");
        assert_eq!(request.authority.as_deref(), Some("example.com"));
        assert_eq!(request.header(":scheme"), Some("https"));
        assert_eq!(request.body, None);
    }

    #[test]
    fn test_request_missing_pseudo_headers() {
        let err = Request::from_parts(5, vec![HeaderField::new(":path", "/")], Bytes::new())
            .unwrap_err();
        assert!(!err.is_connection_error());
        assert_eq!(err.code(), ErrorCode::ProtocolError);

        let err = Request::from_parts(5, vec![HeaderField::new(":method", "GET")], Bytes::new())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolError);
    }

    #[test]
    fn test_route_match() {
        let mut router = Router::new();
        router.route("GET", "/", |_req: &Request| Response::with_body("Hello, world!\n"));

        let response = router.handle_request(&get("/"));
        assert_eq!(response.body.as_deref(), Some(&b"Hello, world!\n"[..]));
        assert_eq!(response.headers, None);
        assert!(response.pushes.is_empty());
    }

    #[test]
    fn test_no_match_without_error_handler() {
        let router = Router::new();
        assert_eq!(router.handle_request(&get("/missing")), Response::new());
    }

    #[test]
    fn test_error_handler_defaults_to_404() {
        let mut router = Router::new();
        router.error_handler(|_req: &Request| Response::with_body("Not found."));

        let response = router.handle_request(&get("/missing"));
        assert_eq!(response.status(), Some("404"));
        assert_eq!(response.body.as_deref(), Some(&b"Not found."[..]));

        let mut router = Router::new();
        router.error_handler(|_req: &Request| Response::with_status(410));
        assert_eq!(router.handle_request(&get("/gone")).status(), Some("410"));
    }

    #[test]
    fn test_method_is_part_of_the_key() {
        let mut router = Router::new();
        router.route("POST", "/", |req: &Request| {
            Response::with_body(req.body.clone().unwrap_or_default())
        });
        assert_eq!(router.handle_request(&get("/")), Response::new());
    }

    #[test]
    fn test_route_with_push() {
        let mut router = Router::new();
        router.route_with_push(
            "GET",
            "/",
            |_req: &Request| Response::with_body("Hello, world!\n"),
            vec![
                PushResource::new("GET", "/1", |_req: &Request| Response::with_body("Server push 1.\n")),
                PushResource::new("GET", "/2", |req: &Request| Response::with_body(req.path.clone())),
            ],
        );

        let response = router.handle_request(&get("/"));
        assert_eq!(response.pushes.len(), 2);

        let first = &response.pushes[0];
        assert_eq!(
            first.request_headers,
            vec![
                HeaderField::new(":method", "GET"),
                HeaderField::new(":scheme", "https"),
                HeaderField::new(":path", "/1"),
                HeaderField::new(":authority", "example.com"),
            ]
        );
        assert_eq!(first.response.body.as_deref(), Some(&b"Server push 1.\n"[..]));
        assert_eq!(response.pushes[1].response.body.as_deref(), Some(&b"/2"[..]));
    }

    #[test]
    fn test_response_builders() {
        let response = Response::with_status(201)
            .header("content-type", "text/plain")
            .body("created");
        assert_eq!(response.status(), Some("201"));
        assert_eq!(response.headers.as_ref().map(Vec::len), Some(2));

        let response = Response::new().header("x-a", "1");
        assert_eq!(response.status(), None);
    }
}
