//! # Metadata Document Codec
//!
//! Parsing of the instance-identity response and its re-encoding as
//! 4-space indented JSON and standard base64.

use crate::errors::FetchError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Map, Serializer, Value};

/// An untyped JSON object as returned by the metadata endpoint.
///
/// Keys keep the order in which they appeared in the response.
pub type MetadataDocument = Map<String, Value>;

const INDENT: &[u8] = b"    ";

/// Parses a response body into a [`MetadataDocument`].
///
/// Anything other than a JSON object is rejected.
pub fn parse_document(body: &[u8]) -> Result<MetadataDocument, FetchError> {
    match serde_json::from_slice::<Value>(body).map_err(FetchError::Parse)? {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(FetchError::NotAnObject("an array")),
        Value::String(_) => Err(FetchError::NotAnObject("a string")),
        Value::Number(_) => Err(FetchError::NotAnObject("a number")),
        Value::Bool(_) => Err(FetchError::NotAnObject("a boolean")),
        Value::Null => Err(FetchError::NotAnObject("null")),
    }
}

/// Serializes the document with a 4-space indent and no trailing newline.
pub fn to_pretty_bytes(document: &MetadataDocument) -> Result<Vec<u8>, FetchError> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(INDENT));
    document.serialize(&mut ser).map_err(FetchError::Encode)?;
    Ok(buf)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, FetchError> {
    Ok(STANDARD.decode(text.trim_end())?)
}

/// The encoded forms of a document that get written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDocument {
    pub pretty: Vec<u8>,
    pub base64: Option<String>,
}

impl EncodedDocument {
    pub fn encode(document: &MetadataDocument, include_base64: bool) -> Result<Self, FetchError> {
        let pretty = to_pretty_bytes(document)?;
        let base64 = include_base64.then(|| encode_base64(&pretty));
        Ok(Self { pretty, base64 })
    }

    /// The pretty JSON as text. Always valid UTF-8 since `serde_json` produced it.
    pub fn pretty_str(&self) -> &str {
        std::str::from_utf8(&self.pretty).unwrap_or_default()
    }
}

/// A best-effort typed view of the well-known identity document keys.
///
/// Used for log lines and span fields only; missing or mistyped keys are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub instance_id: Option<String>,
    pub region: Option<String>,
    pub availability_zone: Option<String>,
    pub account_id: Option<String>,
    pub instance_type: Option<String>,
    pub image_id: Option<String>,
    pub private_ip: Option<String>,
}

impl InstanceIdentity {
    pub fn from_document(document: &MetadataDocument) -> Self {
        let field = |key: &str| {
            document
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            instance_id: field("instanceId"),
            region: field("region"),
            availability_zone: field("availabilityZone"),
            account_id: field("accountId"),
            instance_type: field("instanceType"),
            image_id: field("imageId"),
            private_ip: field("privateIp"),
        }
    }
}
