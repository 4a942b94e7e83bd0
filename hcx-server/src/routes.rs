//! # Request Routing
//!
//! Maps a request to the response the peer should send back.

use std::collections::HashMap;

use bytes::Bytes;
use http::{Method, StatusCode};

use hcx_common::{Request, Response};

/// Produces the response for one request.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

/// Exact-match route table. The query string is ignored when matching.
#[derive(Debug, Default, Clone)]
pub struct Routes {
    table: HashMap<(Method, String), Response>,
}

impl Routes {
    pub fn new() -> Self {
        Routes::default()
    }

    /// Registers `response` for `method` on `path`, replacing any earlier entry.
    pub fn route(mut self, method: Method, path: impl Into<String>, response: Response) -> Self {
        self.table.insert((method, path.into()), response);
        self
    }

    /// Shorthand for a `200 OK` GET route with a fixed body.
    pub fn get(self, path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.route(Method::GET, path, Response::new(StatusCode::OK, body))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Handler for Routes {
    fn handle(&self, request: &Request) -> Response {
        let path = request
            .target
            .split_once('?')
            .map_or(request.target.as_str(), |(path, _)| path);

        // HEAD is served from the GET entry; the codec drops the body.
        let method = if request.method == Method::HEAD {
            Method::GET
        } else {
            request.method.clone()
        };

        self.table
            .get(&(request.method.clone(), path.to_string()))
            .or_else(|| self.table.get(&(method, path.to_string())))
            .cloned()
            .unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND, "not found"))
    }
}
