//! # Metadata Fetcher
//!
//! Fetches the instance-identity document and persists it to disk. A run is
//! strictly sequential and stops at the first failure; see
//! [`MetadataFetcher::fetch_and_persist`].

use crate::document::{parse_document, EncodedDocument, InstanceIdentity};
use crate::errors::FetchError;
use crate::output::{remove_stale, write_output};
use crate::telemetry::TraceContext;
use reqwest::Client as ReqwestClient;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, Instrument};

/// The link-local instance-identity endpoint.
pub const DEFAULT_ENDPOINT: &str =
    "http://169.254.169.254/latest/dynamic/instance-identity/document";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_OUTPUT_FILE_NAME: &str = "meta.json";
pub const DEFAULT_BASE64_FILE_NAME: &str = "meta-b64.txt";

/// Options for a single fetch run.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub endpoint: String,
    pub timeout: Duration,
    /// Directory the output files are written to. `None` means the current
    /// working directory, resolved when the paths are requested.
    pub output_dir: Option<PathBuf>,
    pub output_file_name: String,
    pub include_base64: bool,
    pub base64_file_name: String,
    /// Open tracing spans around the run using the fetcher's [`TraceContext`].
    pub include_tracing: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            output_dir: None,
            output_file_name: DEFAULT_OUTPUT_FILE_NAME.to_string(),
            include_base64: false,
            base64_file_name: DEFAULT_BASE64_FILE_NAME.to_string(),
            include_tracing: false,
        }
    }
}

impl FetchOptions {
    fn dir(&self) -> Result<PathBuf, FetchError> {
        match &self.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().map_err(FetchError::WorkingDir),
        }
    }

    pub fn output_path(&self) -> Result<PathBuf, FetchError> {
        Ok(self.dir()?.join(&self.output_file_name))
    }

    /// The base64 output path, or `None` when base64 output is disabled.
    pub fn base64_path(&self) -> Result<Option<PathBuf>, FetchError> {
        if !self.include_base64 {
            return Ok(None);
        }
        Ok(Some(self.dir()?.join(&self.base64_file_name)))
    }
}

/// The result of a completed run. Only produced when every configured file
/// was written.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub output_path: PathBuf,
    pub base64_path: Option<PathBuf>,
    pub encoded: EncodedDocument,
    pub identity: InstanceIdentity,
}

impl FetchOutcome {
    /// The text reported on standard output: the base64 form when it was
    /// produced, otherwise the pretty JSON.
    pub fn report(&self) -> &str {
        match &self.encoded.base64 {
            Some(b64) => b64,
            None => self.encoded.pretty_str(),
        }
    }
}

pub struct MetadataFetcher {
    client: ReqwestClient,
    options: FetchOptions,
    trace: TraceContext,
}

impl MetadataFetcher {
    /// Creates a new `MetadataFetcher` with a client bound to the configured timeout.
    ///
    /// `trace` supplies the service name and baggage; whether spans are opened
    /// is decided by `options.include_tracing`.
    pub fn new(options: FetchOptions, trace: TraceContext) -> Result<Self, FetchError> {
        let client = ReqwestClient::builder()
            .timeout(options.timeout)
            .build()
            .map_err(FetchError::ClientBuild)?;
        let trace = trace.with_enabled(options.include_tracing);
        Ok(Self {
            client,
            options,
            trace,
        })
    }

    /// Clears old output, fetches the document, and writes it back out.
    ///
    /// Stale files are removed before the request is made, so a failed run
    /// leaves no output behind.
    pub async fn fetch_and_persist(&self) -> Result<FetchOutcome, FetchError> {
        let span = self.trace.operation_span("fetch_and_persist");
        self.run(&span).instrument(span.clone()).await
    }

    async fn run(&self, span: &tracing::Span) -> Result<FetchOutcome, FetchError> {
        let output_path = self.options.output_path()?;
        let base64_path = self.options.base64_path()?;

        let removed = remove_stale(&output_path).await;
        span.record("stale_output", removed.as_str());
        if let Some(path) = &base64_path {
            let removed = remove_stale(path).await;
            span.record("stale_base64", removed.as_str());
        }

        let body = self.fetch_body().await?;
        let document = parse_document(&body)?;
        let identity = InstanceIdentity::from_document(&document);
        if let Some(id) = &identity.instance_id {
            span.record("instance_id", id.as_str());
        }
        if let Some(region) = &identity.region {
            span.record("region", region.as_str());
        }
        debug!("Parsed metadata document with {} keys", document.len());

        let encoded = EncodedDocument::encode(&document, self.options.include_base64)?;

        write_output(&output_path, &encoded.pretty).await?;
        info!(
            "Successfully fetched instance metadata and wrote it to file {}",
            output_path.display()
        );

        if let (Some(path), Some(b64)) = (&base64_path, &encoded.base64) {
            write_output(path, b64.as_bytes()).await?;
            info!(
                "Successfully wrote base64 instance metadata to file {}",
                path.display()
            );
        }

        Ok(FetchOutcome {
            output_path,
            base64_path,
            encoded,
            identity,
        })
    }

    /// Issues the single GET and reads the whole body.
    async fn fetch_body(&self) -> Result<Vec<u8>, FetchError> {
        let url = self.options.endpoint.as_str();
        let span = self.trace.request_span(url);
        async {
            let request = self
                .client
                .get(url)
                .build()
                .map_err(FetchError::Request)?;

            info!("Fetching from url: {url}");
            let response = self
                .client
                .execute(request)
                .await
                .map_err(FetchError::Request)?;

            let status = response.status();
            tracing::Span::current().record("http.status_code", status.as_u16());
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                });
            }

            let body = response.bytes().await.map_err(FetchError::ReadBody)?;
            tracing::Span::current().record("http.response_content_length", body.len() as u64);
            Ok(body.to_vec())
        }
        .instrument(span)
        .await
    }
}

/// Convenience wrapper: builds a fetcher for `options` and runs it once.
pub async fn fetch_and_persist(
    options: FetchOptions,
    trace: TraceContext,
) -> Result<FetchOutcome, FetchError> {
    MetadataFetcher::new(options, trace)?.fetch_and_persist().await
}

