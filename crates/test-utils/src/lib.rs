use anyhow::Result;
use metafetch::FetchOptions;
use serde_json::{json, Value};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::{format::FmtSpan, MakeWriter};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// The path the real metadata service serves the identity document on.
pub const IDENTITY_PATH: &str = "/latest/dynamic/instance-identity/document";

// --- Test Setup ---

/// A mock metadata endpoint plus an isolated output directory for each test.
pub struct TestSetup {
    pub server: MockServer,
    pub dir: TempDir,
}

impl TestSetup {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            server: MockServer::start().await,
            dir: tempfile::tempdir()?,
        })
    }

    /// The identity document URL on the mock server.
    pub fn endpoint(&self) -> String {
        format!("{}{IDENTITY_PATH}", self.server.uri())
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.dir.path().join(file_name)
    }

    /// Fetch options pointed at the mock server and the temp directory.
    pub fn options(&self) -> FetchOptions {
        FetchOptions {
            endpoint: self.endpoint(),
            timeout: Duration::from_secs(2),
            output_dir: Some(self.dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    /// Serves `body` with the given status for every identity document request.
    pub async fn mount_response(&self, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path(IDENTITY_PATH))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_string(body)
                    .insert_header("Content-Type", "application/json"),
            )
            .mount(&self.server)
            .await;
    }

    /// Serves `body` after `delay`, for timeout tests.
    pub async fn mount_delayed(&self, body: &str, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(IDENTITY_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Replaces every mounted response.
    pub async fn reset(&self) {
        self.server.reset().await;
    }
}

/// An endpoint on a port nothing listens on, so connecting is refused.
pub fn closed_endpoint() -> Result<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}{IDENTITY_PATH}"))
}

// --- Span Capture ---

/// An in-memory log sink shared between a test and its subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Installs a `fmt` subscriber for the current thread that writes here,
    /// reporting span open and close events. Dropping the guard uninstalls it.
    pub fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    /// Lines reporting that the span named `span_name` closed. Only the
    /// innermost span of each line's context is considered.
    pub fn close_events(&self, span_name: &str) -> Vec<String> {
        let needle = format!("{span_name}{{");
        self.lines()
            .into_iter()
            .filter(|line| match line.find(": close ") {
                Some(idx) => line[..idx]
                    .rsplit("}:")
                    .next()
                    .is_some_and(|innermost| innermost.contains(&needle)),
                None => false,
            })
            .collect()
    }
}

pub struct CapturedLogsWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLogsWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogsWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedLogsWriter(self.0.clone())
    }
}

// --- Fixtures ---

/// A realistic identity document, with keys in the order the service sends them.
pub fn sample_identity_document() -> Value {
    json!({
        "accountId": "123456789012",
        "architecture": "x86_64",
        "availabilityZone": "us-east-1a",
        "billingProducts": null,
        "devpayProductCodes": null,
        "marketplaceProductCodes": null,
        "imageId": "ami-0abcdef1234567890",
        "instanceId": "i-0123456789abcdef0",
        "instanceType": "t3.micro",
        "kernelId": null,
        "pendingTime": "2024-01-01T00:00:00Z",
        "privateIp": "10.0.0.12",
        "ramdiskId": null,
        "region": "us-east-1",
        "version": "2017-09-30"
    })
}
