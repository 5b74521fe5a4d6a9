//! A double that accepts anything and remembers it.

use std::ops::Deref;

use serde_json::json;

use crate::DoubleError;
use crate::server::{HttpDouble, MockResponse, RecordedRequest};

/// Records every call and answers `200 {"status":"ok"}` unless a handler
/// says otherwise. Useful for webhooks and notification endpoints whose
/// responses the pipeline ignores.
#[derive(Debug)]
pub struct HttpSpy {
    double: HttpDouble,
}

impl HttpSpy {
    pub fn start() -> Result<Self, DoubleError> {
        Self::start_named("spy")
    }

    pub fn start_named(name: &str) -> Result<Self, DoubleError> {
        let fallback = MockResponse::json(200, &json!({ "status": "ok" }));
        Ok(Self {
            double: HttpDouble::start(name, fallback)?,
        })
    }

    pub fn call_count(&self) -> usize {
        self.double.requests().len()
    }

    /// Calls matching `pattern`, e.g. `"POST /hooks/*"`.
    pub fn calls_to(&self, pattern: &str) -> Result<Vec<RecordedRequest>, DoubleError> {
        self.double.requests_matching(pattern)
    }

    pub fn was_called(&self, pattern: &str) -> Result<bool, DoubleError> {
        Ok(!self.calls_to(pattern)?.is_empty())
    }
}

impl Deref for HttpSpy {
    type Target = HttpDouble;

    fn deref(&self) -> &HttpDouble {
        &self.double
    }
}
