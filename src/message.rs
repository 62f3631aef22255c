//! Host message context: the mutable view of one message passing through the
//! gateway pipeline.

use std::fmt;

use crate::error::{Result, SoapValidationError};
use crate::xml::{SOAP11_NS, SOAP12_NS};

/// SOAP protocol version, derived from the envelope namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoapVersion {
    Soap11,
    Soap12,
}

impl SoapVersion {
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            SOAP11_NS => Some(SoapVersion::Soap11),
            SOAP12_NS => Some(SoapVersion::Soap12),
            _ => None,
        }
    }

    pub fn namespace(&self) -> &'static str {
        match self {
            SoapVersion::Soap11 => SOAP11_NS,
            SoapVersion::Soap12 => SOAP12_NS,
        }
    }
}

impl fmt::Display for SoapVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoapVersion::Soap11 => f.write_str("SOAP 1.1"),
            SoapVersion::Soap12 => f.write_str("SOAP 1.2"),
        }
    }
}

/// Which way a message is travelling through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Request from client to backend
    Inbound,
    /// Regular response from backend to client
    Outbound,
    /// Fault response from backend to client
    Fault,
}

impl Direction {
    /// Fault responses win over plain responses.
    pub fn from_context(ctx: &MessageContext) -> Self {
        if ctx.is_fault_response() {
            Direction::Fault
        } else if ctx.is_response() {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("INBOUND"),
            Direction::Outbound => f.write_str("OUTBOUND"),
            Direction::Fault => f.write_str("FAULT"),
        }
    }
}

/// One message as the host pipeline hands it to the mediator.
///
/// The envelope text is owned so the fault handler can swap it for a fault
/// envelope; `send_back` marks the message for immediate return to the caller.
#[derive(Debug, Clone)]
pub struct MessageContext {
    envelope: String,
    version: SoapVersion,
    soap_action: Option<String>,
    response: bool,
    fault_response: bool,
    sent_back: bool,
}

impl MessageContext {
    /// Wrap a raw envelope. Fails when the document is not XML or its root is
    /// not a SOAP 1.1 / 1.2 envelope.
    pub fn new(envelope: impl Into<String>) -> Result<Self> {
        let envelope = envelope.into();
        let version = detect_version(&envelope)?;
        Ok(Self {
            envelope,
            version,
            soap_action: None,
            response: false,
            fault_response: false,
            sent_back: false,
        })
    }

    /// Attach the SOAPAction carried by the transport. Surrounding quotes, as
    /// sent in the HTTP header, are stripped.
    pub fn with_soap_action(mut self, action: impl Into<String>) -> Self {
        let action = action.into();
        let action = action.trim().trim_matches('"').to_string();
        self.soap_action = (!action.is_empty()).then_some(action);
        self
    }

    pub fn as_response(mut self) -> Self {
        self.response = true;
        self
    }

    pub fn as_fault_response(mut self) -> Self {
        self.response = true;
        self.fault_response = true;
        self
    }

    pub fn envelope(&self) -> &str {
        &self.envelope
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn soap_action(&self) -> Option<&str> {
        self.soap_action.as_deref()
    }

    pub fn is_response(&self) -> bool {
        self.response
    }

    pub fn is_fault_response(&self) -> bool {
        self.fault_response
    }

    /// Swap the envelope. The protocol version is kept.
    pub fn replace_envelope(&mut self, envelope: String) {
        self.envelope = envelope;
    }

    pub fn send_back(&mut self) {
        self.sent_back = true;
    }

    pub fn is_sent_back(&self) -> bool {
        self.sent_back
    }
}

fn detect_version(envelope: &str) -> Result<SoapVersion> {
    let doc = roxmltree::Document::parse(envelope).map_err(|e| {
        SoapValidationError::InvalidEnvelope {
            details: e.to_string(),
        }
    })?;
    let root = doc.root_element();
    let namespace = root.tag_name().namespace().unwrap_or_default();

    match SoapVersion::from_namespace(namespace) {
        Some(version) if root.tag_name().name() == "Envelope" => Ok(version),
        _ => Err(SoapValidationError::InvalidEnvelope {
            details: format!(
                "root element {{{}}}{} is not a SOAP envelope",
                namespace,
                root.tag_name().name()
            ),
        }),
    }
}
