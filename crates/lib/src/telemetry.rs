//! # Tracing Context
//!
//! An explicitly constructed tracing context handed to the fetcher. It owns the
//! service name and baggage attached to every span it opens, and replaces a
//! process-wide tracer provider.

use opentelemetry::baggage::BaggageExt;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::BaggagePropagator;
use std::collections::HashMap;
use tracing::{field, info_span, Span};

/// Service name used when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "metafetch";

const BAGGAGE_HEADER: &str = "baggage";

/// Span factory for one fetcher.
///
/// Opens no spans until enabled; [`crate::MetadataFetcher::new`] enables it
/// from `FetchOptions::include_tracing`.
#[derive(Debug, Clone)]
pub struct TraceContext {
    service_name: String,
    baggage: Vec<KeyValue>,
    enabled: bool,
}

impl TraceContext {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            baggage: Vec::new(),
            enabled: false,
        }
    }

    /// Adds a key/value pair propagated on every span opened from this context.
    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.push(KeyValue::new(key.into(), value.into()));
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn baggage(&self) -> &[KeyValue] {
        &self.baggage
    }

    /// Opens the root span for one fetch operation.
    ///
    /// The span closes when the returned handle and every future instrumented
    /// with it are dropped, so it ends on success and on every error path.
    pub fn operation_span(&self, name: &'static str) -> Span {
        if !self.enabled {
            return Span::none();
        }
        info_span!(
            "operation",
            otel.name = name,
            service.name = %self.service_name,
            baggage = %self.baggage_header(),
            stale_output = field::Empty,
            stale_base64 = field::Empty,
            instance_id = field::Empty,
            region = field::Empty,
        )
    }

    /// Opens the child span around the HTTP request.
    pub fn request_span(&self, url: &str) -> Span {
        if !self.enabled {
            return Span::none();
        }
        info_span!(
            "imds.request",
            http.method = "GET",
            http.url = %url,
            http.status_code = field::Empty,
            http.response_content_length = field::Empty,
        )
    }

    /// The baggage serialized as a W3C `baggage` header value by the
    /// OpenTelemetry baggage propagator. Empty when there is no baggage.
    pub fn baggage_header(&self) -> String {
        if self.baggage.is_empty() {
            return String::new();
        }
        let cx = Context::new().with_baggage(self.baggage.iter().cloned());
        let mut carrier: HashMap<String, String> = HashMap::new();
        BaggagePropagator::new().inject_context(&cx, &mut carrier);
        carrier.remove(BAGGAGE_HEADER).unwrap_or_default()
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}
