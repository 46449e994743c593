//! # Instance Metadata Fetcher
//!
//! This crate fetches the instance-identity document from the cloud provider's
//! link-local metadata endpoint, re-encodes it as indented JSON (and optionally
//! base64), and writes it to disk. It also owns the logging setup used by the
//! `metafetch` binary.

pub mod document;
pub mod errors;
pub mod fetcher;
pub mod logging;
pub mod output;
pub mod telemetry;

pub use document::{EncodedDocument, InstanceIdentity, MetadataDocument};
pub use errors::{ErrorKind, FetchError, LoggingError};
pub use fetcher::{fetch_and_persist, FetchOptions, FetchOutcome, MetadataFetcher};
pub use logging::{init_logging, LogOptions};
pub use telemetry::TraceContext;
