use thiserror::Error;

use crate::validator::ValidationProblem;

/// Pipeline error covering every way a mediation pass can end in a fault.
///
/// The type is `Clone` because the resolver caches hand the very same failure
/// to every caller waiting on an in-flight build.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SoapValidationError {
    #[error("soap {scope}body empty")]
    BodyEmpty { scope: BodyScope },

    #[error("invalid SOAP envelope: {details}")]
    InvalidEnvelope { details: String },

    #[error("no service found for api {api_id}: {reason}")]
    NoService { api_id: String, reason: String },

    #[error("no service found for api {api_id} matching action '{action}' and body {body}")]
    NoMatch {
        api_id: String,
        action: String,
        body: String,
    },

    #[error("error while finding corresponding service and operation: {details}")]
    Conflict { details: String },

    #[error("error during schema compilation: {details}")]
    CompileError { details: String },

    #[error("{details}")]
    StreamError { details: String },

    #[error("payload not conform to schema")]
    SchemaViolation { problems: Vec<ValidationProblem> },

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

impl SoapValidationError {
    /// Validation problems attached to this error, empty for every kind but
    /// `SchemaViolation`.
    pub fn problems(&self) -> &[ValidationProblem] {
        match self {
            SoapValidationError::SchemaViolation { problems } => problems,
            _ => &[],
        }
    }
}

/// Which SOAP body turned out to be empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyScope {
    /// The body of the received envelope
    Envelope,
    /// The body of an envelope re-wrapped inside the outer body
    Inner,
}

impl std::fmt::Display for BodyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodyScope::Envelope => Ok(()),
            BodyScope::Inner => f.write_str("(inner)"),
        }
    }
}

/// Document-retrieval errors (registry and remote references)
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status error: {status} for {url} - {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Request timeout: {url} after {timeout_seconds} seconds")]
    Timeout { url: String, timeout_seconds: u64 },

    #[error("API not found in registry: {path}")]
    ApiNotFound { path: String },

    #[error("No WSDL found for api {api_id} in {path}")]
    WsdlNotFound { api_id: String, path: String },

    #[error("Document not found: {location}")]
    NotFound { location: String },
}

/// WSDL parsing errors raised by the service-model builder
#[derive(Error, Debug)]
pub enum WsdlError {
    #[error("Failed to load {location}: {source}")]
    Document {
        location: String,
        #[source]
        source: DocumentError,
    },

    #[error("Document is not valid UTF-8: {location}")]
    Encoding { location: String },

    #[error("Malformed XML in {location}: {details}")]
    Xml { location: String, details: String },

    #[error("Not a WSDL 1.1 definitions document: {location}")]
    NotWsdl { location: String },

    #[error("Unresolvable reference {reference} in {location}")]
    UnresolvedReference { location: String, reference: String },

    #[error("Missing attribute '{attribute}' on <{element}> in {location}")]
    MissingAttribute {
        location: String,
        element: String,
        attribute: &'static str,
    },
}

/// LibXML2-specific error types
#[derive(Error, Debug)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: {details}")]
    SchemaParseFailed { details: String },

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Schema could not be attached to the stream reader (code {code})")]
    SchemaAttachFailed { code: i32 },

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Input too large for libxml2: {size} bytes")]
    InputTooLarge { size: usize },

    #[error("Invalid XML structure: {details}")]
    InvalidXml { details: String },
}

// Collaborator failures are folded into pipeline errors with their cause text kept.
impl From<LibXml2Error> for SoapValidationError {
    fn from(err: LibXml2Error) -> Self {
        match err {
            LibXml2Error::InvalidXml { details } => SoapValidationError::StreamError { details },
            other => SoapValidationError::CompileError {
                details: other.to_string(),
            },
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SoapValidationError>;

/// Document retrieval result type alias
pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

/// WSDL parsing result type alias
pub type WsdlResult<T> = std::result::Result<T, WsdlError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
