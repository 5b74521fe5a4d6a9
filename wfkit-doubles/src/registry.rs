//! Mock of the plugin catalog API (grafana.com).

use std::ops::Deref;

use serde_json::{Value, json};

use crate::DoubleError;
use crate::server::{HttpDouble, MockResponse, RecordedRequest};

const PUBLISH_ROUTE: &str = "POST /api/plugins";

/// Catalog double. Anything without a handler gets
/// `404 {"code":"NotFound"}` so a missing mock fails loudly.
#[derive(Debug)]
pub struct GcomMock {
    double: HttpDouble,
}

impl GcomMock {
    pub fn start() -> Result<Self, DoubleError> {
        let fallback = MockResponse::json(404, &json!({ "code": "NotFound", "message": "Not found" }));
        Ok(Self {
            double: HttpDouble::start("gcom", fallback)?,
        })
    }

    /// URL for the catalog API as steps expect it (`.../api`).
    pub fn api_url(&self) -> String {
        format!("{}/api", self.double.container_url())
    }

    /// `GET /api/plugins/<slug>` returns `plugin`.
    pub fn handle_plugin(&self, slug: &str, plugin: Value) -> Result<(), DoubleError> {
        self.double
            .respond(&format!("GET /api/plugins/{slug}"), MockResponse::json(200, &plugin))
    }

    /// `GET /api/plugins/<slug>/versions` lists `versions` under `items`.
    pub fn handle_plugin_versions(&self, slug: &str, versions: Vec<Value>) -> Result<(), DoubleError> {
        let body = json!({ "items": versions });
        self.double.respond(
            &format!("GET /api/plugins/{slug}/versions"),
            MockResponse::json(200, &body),
        )
    }

    /// `POST /api/plugins` answers with `status`.
    pub fn handle_publish(&self, status: u16) -> Result<(), DoubleError> {
        let body = if (200..300).contains(&status) {
            json!({ "status": "published" })
        } else {
            json!({ "code": "PublishFailed", "message": format!("publish rejected with {status}") })
        };
        self.double.respond(PUBLISH_ROUTE, MockResponse::json(status, &body))
    }

    /// Publish requests received so far.
    pub fn publish_requests(&self) -> Vec<RecordedRequest> {
        self.double
            .requests()
            .into_iter()
            .filter(|r| r.method == "POST" && r.path.trim_end_matches('/') == "/api/plugins")
            .collect()
    }
}

impl Deref for GcomMock {
    type Target = HttpDouble;

    fn deref(&self) -> &HttpDouble {
        &self.double
    }
}
