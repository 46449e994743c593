//! # Fetcher Tests
//!
//! End-to-end tests for `MetadataFetcher` against a mock metadata endpoint,
//! writing into a temporary directory.

use anyhow::Result;
use metafetch::document::decode_base64;
use metafetch::{ErrorKind, FetchError, MetadataFetcher, TraceContext};
use metafetch_test_utils::{closed_endpoint, sample_identity_document, CapturedLogs, TestSetup};
use serde_json::Value;
use std::fs;
use std::time::Duration;

#[tokio::test]
async fn test_fetch_writes_pretty_document() -> Result<()> {
    // --- Arrange ---
    let setup = TestSetup::new().await?;
    let doc = sample_identity_document();
    setup.mount_response(200, &doc.to_string()).await;
    let fetcher = MetadataFetcher::new(setup.options(), TraceContext::default())?;

    // --- Act ---
    let outcome = fetcher.fetch_and_persist().await?;

    // --- Assert ---
    let output_path = setup.output_path("meta.json");
    assert_eq!(outcome.output_path, output_path);
    assert!(outcome.base64_path.is_none());
    assert!(!setup.output_path("meta-b64.txt").exists());

    let written = fs::read_to_string(&output_path)?;
    let parsed: Value = serde_json::from_str(&written)?;
    assert_eq!(parsed, doc);
    assert!(written.starts_with("{\n    \"accountId\": \"123456789012\",\n"));
    assert!(!written.ends_with('\n'));
    assert_eq!(outcome.report(), written);

    assert_eq!(
        outcome.identity.instance_id.as_deref(),
        Some("i-0123456789abcdef0")
    );
    assert_eq!(outcome.identity.region.as_deref(), Some("us-east-1"));

    Ok(())
}

#[tokio::test]
async fn test_fetch_example_document_with_base64() -> Result<()> {
    // --- Arrange ---
    let setup = TestSetup::new().await?;
    setup
        .mount_response(200, r#"{"region":"us-east-1","instanceId":"i-0123"}"#)
        .await;
    let mut options = setup.options();
    options.include_base64 = true;

    // --- Act ---
    let outcome = metafetch::fetch_and_persist(options, TraceContext::default()).await?;

    // --- Assert ---
    let json = fs::read(setup.output_path("meta.json"))?;
    assert_eq!(
        String::from_utf8(json.clone())?,
        "{\n    \"region\": \"us-east-1\",\n    \"instanceId\": \"i-0123\"\n}"
    );

    let b64_path = setup.output_path("meta-b64.txt");
    assert_eq!(outcome.base64_path.as_deref(), Some(b64_path.as_path()));
    let b64 = fs::read_to_string(&b64_path)?;
    assert_eq!(decode_base64(&b64)?, json);
    assert_eq!(outcome.report(), b64);

    Ok(())
}

#[tokio::test]
async fn test_second_run_overwrites_previous_output() -> Result<()> {
    // --- Arrange ---
    let setup = TestSetup::new().await?;
    let mut options = setup.options();
    options.include_base64 = true;
    let fetcher = MetadataFetcher::new(options, TraceContext::default())?;

    setup
        .mount_response(
            200,
            r#"{"region":"eu-central-1","instanceId":"i-first","extra":"only in run one"}"#,
        )
        .await;
    fetcher.fetch_and_persist().await?;

    // --- Act ---
    setup.reset().await;
    setup
        .mount_response(200, r#"{"region":"us-west-2","instanceId":"i-second"}"#)
        .await;
    fetcher.fetch_and_persist().await?;

    // --- Assert ---
    let written = fs::read_to_string(setup.output_path("meta.json"))?;
    assert!(!written.contains("only in run one"));
    assert!(!written.contains("i-first"));
    let parsed: Value = serde_json::from_str(&written)?;
    assert_eq!(parsed["instanceId"], "i-second");

    let b64 = fs::read_to_string(setup.output_path("meta-b64.txt"))?;
    assert_eq!(decode_base64(&b64)?, written.as_bytes());

    Ok(())
}

#[tokio::test]
async fn test_network_failure_leaves_stale_output_removed() -> Result<()> {
    // --- Arrange ---
    let setup = TestSetup::new().await?;
    let output_path = setup.output_path("meta.json");
    let b64_path = setup.output_path("meta-b64.txt");
    fs::write(&output_path, r#"{"instanceId":"i-old"}"#)?;
    fs::write(&b64_path, "b2xk")?;

    let mut options = setup.options();
    options.endpoint = closed_endpoint()?;
    options.include_base64 = true;

    // --- Act ---
    let result = metafetch::fetch_and_persist(options, TraceContext::default()).await;

    // --- Assert ---
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(matches!(err, FetchError::Request(_)));
    assert!(!output_path.exists());
    assert!(!b64_path.exists());

    Ok(())
}

#[tokio::test]
async fn test_non_json_body_is_parse_error() -> Result<()> {
    // --- Arrange ---
    let setup = TestSetup::new().await?;
    setup
        .mount_response(200, "<html><body>Not Found</body></html>")
        .await;

    // --- Act ---
    let result = metafetch::fetch_and_persist(setup.options(), TraceContext::default()).await;

    // --- Assert ---
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(matches!(err, FetchError::Parse(_)));
    assert!(!setup.output_path("meta.json").exists());

    Ok(())
}

#[tokio::test]
async fn test_json_array_body_is_parse_error() -> Result<()> {
    let setup = TestSetup::new().await?;
    setup.mount_response(200, r#"["i-0123"]"#).await;

    let result = metafetch::fetch_and_persist(setup.options(), TraceContext::default()).await;

    assert!(matches!(result.unwrap_err(), FetchError::NotAnObject(_)));
    assert!(!setup.output_path("meta.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_error_status_is_network_error() -> Result<()> {
    // --- Arrange ---
    let setup = TestSetup::new().await?;
    setup.mount_response(404, "").await;

    // --- Act ---
    let result = metafetch::fetch_and_persist(setup.options(), TraceContext::default()).await;

    // --- Assert ---
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    match err {
        FetchError::Status { status, url } => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(url, setup.endpoint());
        }
        other => panic!("expected a status error, got {other:?}"),
    }
    assert!(!setup.output_path("meta.json").exists());

    Ok(())
}

#[tokio::test]
async fn test_slow_endpoint_times_out() -> Result<()> {
    // --- Arrange ---
    let setup = TestSetup::new().await?;
    setup
        .mount_delayed(r#"{"instanceId":"i-slow"}"#, Duration::from_secs(2))
        .await;
    let mut options = setup.options();
    options.timeout = Duration::from_millis(200);

    // --- Act ---
    let result = metafetch::fetch_and_persist(options, TraceContext::default()).await;

    // --- Assert ---
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.is_timeout());
    assert!(!setup.output_path("meta.json").exists());

    Ok(())
}

#[tokio::test]
async fn test_invalid_endpoint_is_network_error() -> Result<()> {
    let setup = TestSetup::new().await?;
    let mut options = setup.options();
    options.endpoint = "not a url".to_string();

    let result = metafetch::fetch_and_persist(options, TraceContext::default()).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Network);
    Ok(())
}

#[tokio::test]
async fn test_custom_output_name_with_tracing_enabled() -> Result<()> {
    // --- Arrange ---
    let setup = TestSetup::new().await?;
    let doc = sample_identity_document();
    let body = doc.to_string();
    setup.mount_response(200, &body).await;
    fs::write(setup.output_path("ec2-instance-metadata.json"), "{}")?;
    let mut options = setup.options();
    options.output_file_name = "ec2-instance-metadata.json".to_string();
    options.include_tracing = true;
    let trace = TraceContext::new("metafetch-test")
        .with_baggage("ex.com/foo", "foo1")
        .with_baggage("ex.com/bar", "bar1");
    let (logs, _guard) = CapturedLogs::install();

    // --- Act ---
    let outcome = metafetch::fetch_and_persist(options, trace).await?;

    // --- Assert ---
    let output_path = setup.output_path("ec2-instance-metadata.json");
    assert_eq!(outcome.output_path, output_path);
    let parsed: Value = serde_json::from_str(&fs::read_to_string(&output_path)?)?;
    assert_eq!(parsed, doc);
    assert!(!setup.output_path("meta.json").exists());

    let operation = logs.close_events("operation");
    assert_eq!(operation.len(), 1, "{}", logs.contents());
    let operation = &operation[0];
    assert!(operation.contains("instance_id=\"i-0123456789abcdef0\""));
    assert!(operation.contains("region=\"us-east-1\""));
    assert!(operation.contains("stale_output=\"removed\""));
    assert!(operation.contains("service.name=metafetch-test"));
    assert!(operation.contains("ex.com/foo=foo1"));

    let request = logs.close_events("imds.request");
    assert_eq!(request.len(), 1, "{}", logs.contents());
    assert!(request[0].contains("http.status_code=200"));
    assert!(request[0].contains(&format!("http.response_content_length={}", body.len())));

    Ok(())
}

#[tokio::test]
async fn test_tracing_flag_opens_spans_with_default_context() -> Result<()> {
    // --- Arrange ---
    let setup = TestSetup::new().await?;
    setup
        .mount_response(200, &sample_identity_document().to_string())
        .await;
    let mut options = setup.options();
    options.include_tracing = true;
    let (logs, _guard) = CapturedLogs::install();

    // --- Act ---
    metafetch::fetch_and_persist(options, TraceContext::default()).await?;

    // --- Assert ---
    assert_eq!(logs.close_events("operation").len(), 1, "{}", logs.contents());
    assert_eq!(logs.close_events("imds.request").len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_tracing_flag_off_opens_no_spans() -> Result<()> {
    // --- Arrange ---
    let setup = TestSetup::new().await?;
    setup
        .mount_response(200, &sample_identity_document().to_string())
        .await;
    let trace = TraceContext::new("metafetch-test").with_enabled(true);
    let (logs, _guard) = CapturedLogs::install();

    // --- Act ---
    metafetch::fetch_and_persist(setup.options(), trace).await?;

    // --- Assert ---
    let contents = logs.contents();
    assert!(contents.contains("Fetching from url:"));
    assert!(!contents.contains("imds.request"), "{contents}");
    assert!(logs.close_events("operation").is_empty());

    Ok(())
}

#[tokio::test]
async fn test_spans_close_when_request_fails() -> Result<()> {
    // --- Arrange ---
    let setup = TestSetup::new().await?;
    let mut options = setup.options();
    options.endpoint = closed_endpoint()?;
    options.include_tracing = true;
    let (logs, _guard) = CapturedLogs::install();

    // --- Act ---
    let result = metafetch::fetch_and_persist(options, TraceContext::default()).await;

    // --- Assert ---
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Network);

    let request = logs.close_events("imds.request");
    assert_eq!(request.len(), 1, "{}", logs.contents());
    assert!(!request[0].contains("http.status_code="));

    let operation = logs.close_events("operation");
    assert_eq!(operation.len(), 1, "{}", logs.contents());
    assert!(operation[0].contains("stale_output=\"not_found\""));
    assert!(!operation[0].contains("instance_id="));

    Ok(())
}
