//! Streaming payload validation against a compiled schema.
//!
//! The body element is serialized on its own and pulled through a libxml2
//! text reader with the operation's schema attached. Every violation is
//! collected; the caller decides what an invalid payload means.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::compiler::CompiledSchema;
use crate::error::{LibXml2Error, Result, SoapValidationError};
use crate::libxml2::{LibXml2Wrapper, XmlDiagnostic};
use crate::xml::XmlElement;

/// Severity reported by the schema engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl Severity {
    fn from_level(level: i32) -> Self {
        match level {
            1 => Severity::Warning,
            3 => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
            Severity::Fatal => f.write_str("fatal"),
        }
    }
}

/// One schema violation found in a payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationProblem {
    pub message: String,
    /// Line within the serialized body element
    pub line: Option<u32>,
    /// Only known for well-formedness diagnostics; libxml2 leaves it unset
    /// for schema violations.
    pub column: Option<u32>,
    pub severity: Severity,
}

impl From<&XmlDiagnostic> for ValidationProblem {
    fn from(diagnostic: &XmlDiagnostic) -> Self {
        Self {
            message: diagnostic.message.clone(),
            line: u32::try_from(diagnostic.line).ok().filter(|l| *l > 0),
            column: if diagnostic.is_schema_validity() {
                None
            } else {
                u32::try_from(diagnostic.column).ok().filter(|c| *c > 0)
            },
            severity: Severity::from_level(diagnostic.level),
        }
    }
}

impl fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "[{}] line {}:{}: {}", self.severity, line, column, self.message)
            }
            (Some(line), None) => write!(f, "[{}] line {}: {}", self.severity, line, self.message),
            _ => write!(f, "[{}] {}", self.severity, self.message),
        }
    }
}

/// Stateless validator; one instance can serve any number of concurrent calls.
#[derive(Clone)]
pub struct SoapValidator {
    libxml2: Arc<LibXml2Wrapper>,
}

impl SoapValidator {
    pub fn new() -> Self {
        Self {
            libxml2: Arc::new(LibXml2Wrapper::new()),
        }
    }

    /// Validate `body` against `schema`.
    ///
    /// An empty list means the payload conforms. Malformed XML fails with
    /// `StreamError`.
    pub fn validate(
        &self,
        schema: &CompiledSchema,
        body: &XmlElement,
    ) -> Result<Vec<ValidationProblem>> {
        debug!(body = %body.name(), "Starting SOAP payload validation");

        let mut reader = self
            .libxml2
            .schema_reader(schema.schema_ptr(), body.as_str().as_bytes())
            .map_err(stream_error)?;

        while reader.read().map_err(stream_error)? {
            if reader.is_start_element_named("Body") {
                debug!("Reached SOAP <Body> element");
                break;
            }
        }
        while reader.read().map_err(stream_error)? {}

        let verdict = reader.is_valid();
        let mut problems: Vec<ValidationProblem> = reader
            .into_diagnostics()
            .iter()
            .filter(|d| d.is_schema_validity())
            .map(ValidationProblem::from)
            .collect();

        if verdict == Some(false) && problems.is_empty() {
            problems.push(ValidationProblem {
                message: format!("Element '{}' is not valid", body.name().local_name()),
                line: None,
                column: None,
                severity: Severity::Error,
            });
        }

        debug!(problems = problems.len(), "SOAP validation completed");
        Ok(problems)
    }
}

/// Any libxml2 failure after compilation is a stream failure
fn stream_error(err: LibXml2Error) -> SoapValidationError {
    match err {
        LibXml2Error::InvalidXml { details } => SoapValidationError::StreamError { details },
        other => SoapValidationError::StreamError {
            details: other.to_string(),
        },
    }
}

impl Default for SoapValidator {
    fn default() -> Self {
        Self::new()
    }
}
