//! SOAP message analysis: direction, version, action, payload and headers.

use roxmltree::Node;
use tracing::{debug, warn};

use crate::error::{BodyScope, Result, SoapValidationError};
use crate::message::{Direction, MessageContext, SoapVersion};
use crate::xml::{QName, SOAP11_NS, XmlElement, child_element};

/// What the analyzer found in a message
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisResult {
    /// The message is a fault response; there is nothing to validate.
    Fault,
    Message(AnalyzedMessage),
}

/// Immutable view of one inbound or outbound message.
///
/// Outbound messages never carry an action or headers.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedMessage {
    direction: Direction,
    version: SoapVersion,
    action: Option<String>,
    body: XmlElement,
    headers: Vec<XmlElement>,
}

impl AnalyzedMessage {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn body(&self) -> &XmlElement {
        &self.body
    }

    pub fn body_name(&self) -> &QName {
        self.body.name()
    }

    pub fn headers(&self) -> &[XmlElement] {
        &self.headers
    }
}

pub struct SoapAnalyzer;

impl SoapAnalyzer {
    pub fn analyze(ctx: &MessageContext) -> Result<AnalysisResult> {
        let direction = Direction::from_context(ctx);
        debug!(%direction, "SOAP direction determined");

        if direction == Direction::Fault {
            return Ok(AnalysisResult::Fault);
        }

        let version = ctx.version();
        let action = ctx.soap_action().map(str::to_string);
        debug!(%version, action = action.as_deref().unwrap_or(""), "SOAP version determined");

        let doc = roxmltree::Document::parse(ctx.envelope()).map_err(|e| {
            SoapValidationError::InvalidEnvelope {
                details: e.to_string(),
            }
        })?;
        let envelope = doc.root_element();

        let mut payload = child_element(envelope, version.namespace(), "Body")
            .and_then(|body| body.first_element_child())
            .ok_or_else(|| {
                warn!("SOAP body is empty");
                SoapValidationError::BodyEmpty {
                    scope: BodyScope::Envelope,
                }
            })?;

        if version == SoapVersion::Soap11 && payload.has_tag_name((SOAP11_NS, "Envelope")) {
            payload = child_element(payload, SOAP11_NS, "Body")
                .and_then(|body| body.first_element_child())
                .ok_or_else(|| {
                    warn!("SOAP (inner)body is empty");
                    SoapValidationError::BodyEmpty {
                        scope: BodyScope::Inner,
                    }
                })?;
            debug!("Double-wrapped SOAP 1.1 payload unwrapped");
        }

        if payload.next_sibling_element().is_some() {
            warn!(
                element = payload.tag_name().name(),
                "Found more than one element in the SOAP body, only the first will be analyzed"
            );
        }

        let body = to_element(payload)?;
        debug!(body = %body.name(), "SOAP body element found");

        if direction == Direction::Outbound {
            return Ok(AnalysisResult::Message(AnalyzedMessage {
                direction,
                version,
                action: None,
                body,
                headers: Vec::new(),
            }));
        }

        let headers = match child_element(envelope, version.namespace(), "Header") {
            Some(header) => header
                .children()
                .filter(Node::is_element)
                .map(to_element)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        debug!(count = headers.len(), "SOAP header elements collected");

        Ok(AnalysisResult::Message(AnalyzedMessage {
            direction,
            version,
            action,
            body,
            headers,
        }))
    }
}

fn to_element(node: Node<'_, '_>) -> Result<XmlElement> {
    XmlElement::from_node(node).map_err(|e| SoapValidationError::InvalidEnvelope {
        details: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS_NS: &str = "http://example.com/users";

    fn soap11(header: &str, body: &str) -> String {
        format!(
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:usr="http://example.com/users">{}<soapenv:Body>{}</soapenv:Body></soapenv:Envelope>"#,
            header, body
        )
    }

    fn message(result: AnalysisResult) -> AnalyzedMessage {
        match result {
            AnalysisResult::Message(message) => message,
            AnalysisResult::Fault => panic!("Expected a message, got the fault sentinel"),
        }
    }

    #[test]
    fn test_inbound_collects_action_body_and_headers() {
        let envelope = soap11(
            "<soapenv:Header><usr:Tenant>acme</usr:Tenant><!-- x --><usr:Trace/></soapenv:Header>",
            "<usr:GetUserRequest><usr:userId>1</usr:userId></usr:GetUserRequest>",
        );
        let ctx = MessageContext::new(envelope)
            .unwrap()
            .with_soap_action("GetUser");

        let analyzed = message(SoapAnalyzer::analyze(&ctx).unwrap());

        assert_eq!(analyzed.direction(), Direction::Inbound);
        assert_eq!(analyzed.version(), SoapVersion::Soap11);
        assert_eq!(analyzed.action(), Some("GetUser"));
        assert_eq!(
            analyzed.body_name(),
            &QName::new(Some(USERS_NS), "GetUserRequest")
        );
        let header_names: Vec<_> = analyzed
            .headers()
            .iter()
            .map(|h| h.name().local_name().to_string())
            .collect();
        assert_eq!(header_names, vec!["Tenant", "Trace"]);
    }

    #[test]
    fn test_missing_header_gives_empty_list() {
        let ctx = MessageContext::new(soap11("", "<usr:Ping/>")).unwrap();
        let analyzed = message(SoapAnalyzer::analyze(&ctx).unwrap());
        assert!(analyzed.headers().is_empty());
        assert_eq!(analyzed.action(), None);
    }

    #[test]
    fn test_outbound_omits_action_and_headers() {
        let envelope = soap11(
            "<soapenv:Header><usr:Tenant>acme</usr:Tenant></soapenv:Header>",
            "<usr:GetUserResponse/>",
        );
        let ctx = MessageContext::new(envelope)
            .unwrap()
            .with_soap_action("GetUser")
            .as_response();

        let analyzed = message(SoapAnalyzer::analyze(&ctx).unwrap());

        assert_eq!(analyzed.direction(), Direction::Outbound);
        assert_eq!(analyzed.action(), None);
        assert!(analyzed.headers().is_empty());
        assert_eq!(analyzed.body_name().local_name(), "GetUserResponse");
    }

    #[test]
    fn test_fault_response_is_sentinel() {
        let ctx = MessageContext::new(soap11("", ""))
            .unwrap()
            .as_fault_response();
        assert_eq!(SoapAnalyzer::analyze(&ctx).unwrap(), AnalysisResult::Fault);
    }

    #[test]
    fn test_empty_body_fails() {
        let ctx = MessageContext::new(soap11("", "  <!-- nothing -->  ")).unwrap();
        assert_eq!(
            SoapAnalyzer::analyze(&ctx).unwrap_err(),
            SoapValidationError::BodyEmpty {
                scope: BodyScope::Envelope
            }
        );
    }

    #[test]
    fn test_double_wrapped_soap11_is_unwrapped_once() {
        let inner = r#"<soapenv:Envelope><soapenv:Body><usr:GetUserRequest/></soapenv:Body></soapenv:Envelope>"#;
        let ctx = MessageContext::new(soap11("", inner)).unwrap();

        let analyzed = message(SoapAnalyzer::analyze(&ctx).unwrap());
        assert_eq!(
            analyzed.body_name(),
            &QName::new(Some(USERS_NS), "GetUserRequest")
        );
    }

    #[test]
    fn test_double_wrapped_with_empty_inner_body_fails() {
        let inner = r#"<soapenv:Envelope><soapenv:Body/></soapenv:Envelope>"#;
        let ctx = MessageContext::new(soap11("", inner)).unwrap();
        assert_eq!(
            SoapAnalyzer::analyze(&ctx).unwrap_err(),
            SoapValidationError::BodyEmpty {
                scope: BodyScope::Inner
            }
        );
    }

    #[test]
    fn test_soap12_envelope_child_is_not_unwrapped() {
        let envelope = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:s11="http://schemas.xmlsoap.org/soap/envelope/"><env:Body><s11:Envelope><s11:Body><Inner/></s11:Body></s11:Envelope></env:Body></env:Envelope>"#;
        let ctx = MessageContext::new(envelope).unwrap();

        let analyzed = message(SoapAnalyzer::analyze(&ctx).unwrap());
        assert_eq!(analyzed.body_name(), &QName::new(Some(SOAP11_NS), "Envelope"));
    }

    #[test]
    fn test_extra_body_siblings_are_ignored() {
        let ctx = MessageContext::new(soap11("", "<usr:First/><usr:Second/>")).unwrap();
        let analyzed = message(SoapAnalyzer::analyze(&ctx).unwrap());
        assert_eq!(analyzed.body_name().local_name(), "First");
    }
}
