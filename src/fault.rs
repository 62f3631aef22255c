//! SOAP fault synthesis.
//!
//! Every failure of a mediation pass ends here: the message is replaced with
//! a fault envelope of the message's own SOAP version and sent back to the
//! caller.

use std::io::Cursor;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use tracing::error;

use crate::error::SoapValidationError;
use crate::mediator::Mediation;
use crate::message::{Direction, MessageContext, SoapVersion};
use crate::validator::{Severity, ValidationProblem};

/// Reason text sent to the caller for `error`
pub fn fault_reason(error: &SoapValidationError) -> String {
    match error {
        SoapValidationError::BodyEmpty { .. } | SoapValidationError::SchemaViolation { .. } => {
            error.to_string()
        }
        SoapValidationError::InvalidEnvelope { .. } => "invalid soap envelope".to_string(),
        SoapValidationError::NoService { .. } | SoapValidationError::NoMatch { .. } => {
            "no service found".to_string()
        }
        SoapValidationError::Conflict { .. } => {
            "error while finding corresponding service and operation".to_string()
        }
        SoapValidationError::CompileError { .. } => "error during schema compilation".to_string(),
        SoapValidationError::StreamError { details } => details.clone(),
        SoapValidationError::Concurrency { .. } => "error during soap validation".to_string(),
    }
}

/// Fault envelope for `version`.
///
/// The code blames the sender for inbound messages and the receiver
/// otherwise. `problems`, when not empty, are listed in the fault detail.
pub fn build_fault_envelope(
    version: SoapVersion,
    direction: Direction,
    reason: &str,
    problems: &[ValidationProblem],
) -> Result<String, quick_xml::Error> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let prefix = match version {
        SoapVersion::Soap11 => "soapenv",
        SoapVersion::Soap12 => "env",
    };
    let qualified = |local: &str| format!("{}:{}", prefix, local);

    let mut envelope = BytesStart::new(qualified("Envelope"));
    envelope.push_attribute((format!("xmlns:{}", prefix).as_str(), version.namespace()));
    writer.write_event(Event::Start(envelope))?;
    writer.write_event(Event::Start(BytesStart::new(qualified("Body"))))?;
    writer.write_event(Event::Start(BytesStart::new(qualified("Fault"))))?;

    let blames_sender = direction == Direction::Inbound;
    match version {
        SoapVersion::Soap11 => {
            let code = if blames_sender { "Client" } else { "Server" };
            write_text_element(&mut writer, BytesStart::new("faultcode"), &qualified(code))?;
            write_text_element(&mut writer, BytesStart::new("faultstring"), reason)?;
            if !problems.is_empty() {
                write_problems(&mut writer, "detail", problems)?;
            }
        }
        SoapVersion::Soap12 => {
            let code = if blames_sender { "Sender" } else { "Receiver" };
            writer.write_event(Event::Start(BytesStart::new(qualified("Code"))))?;
            write_text_element(&mut writer, BytesStart::new(qualified("Value")), &qualified(code))?;
            writer.write_event(Event::End(BytesEnd::new(qualified("Code"))))?;

            writer.write_event(Event::Start(BytesStart::new(qualified("Reason"))))?;
            let mut text = BytesStart::new(qualified("Text"));
            text.push_attribute(("xml:lang", "en"));
            write_text_element(&mut writer, text, reason)?;
            writer.write_event(Event::End(BytesEnd::new(qualified("Reason"))))?;

            if !problems.is_empty() {
                write_problems(&mut writer, &qualified("Detail"), problems)?;
            }
        }
    }

    writer.write_event(Event::End(BytesEnd::new(qualified("Fault"))))?;
    writer.write_event(Event::End(BytesEnd::new(qualified("Body"))))?;
    writer.write_event(Event::End(BytesEnd::new(qualified("Envelope"))))?;

    Ok(String::from_utf8_lossy(&writer.into_inner().into_inner()).into_owned())
}

/// Fault envelope with a constant reason, written without the XML writer
pub fn fixed_fault_envelope(version: SoapVersion, direction: Direction) -> String {
    let blames_sender = direction == Direction::Inbound;
    match version {
        SoapVersion::Soap11 => format!(
            concat!(
                r#"<soapenv:Envelope xmlns:soapenv="{}"><soapenv:Body><soapenv:Fault>"#,
                "<faultcode>soapenv:{}</faultcode><faultstring>{}</faultstring>",
                "</soapenv:Fault></soapenv:Body></soapenv:Envelope>"
            ),
            version.namespace(),
            if blames_sender { "Client" } else { "Server" },
            FIXED_FAULT_REASON
        ),
        SoapVersion::Soap12 => format!(
            concat!(
                r#"<env:Envelope xmlns:env="{}"><env:Body><env:Fault>"#,
                "<env:Code><env:Value>env:{}</env:Value></env:Code>",
                r#"<env:Reason><env:Text xml:lang="en">{}</env:Text></env:Reason>"#,
                "</env:Fault></env:Body></env:Envelope>"
            ),
            version.namespace(),
            if blames_sender { "Sender" } else { "Receiver" },
            FIXED_FAULT_REASON
        ),
    }
}

const FIXED_FAULT_REASON: &str = "error during soap validation";

fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    start: BytesStart<'_>,
    text: &str,
) -> Result<(), quick_xml::Error> {
    let end = start.to_end().into_owned();
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(end))?;
    Ok(())
}

fn write_problems(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    container: &str,
    problems: &[ValidationProblem],
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(container)))?;
    for problem in problems {
        let mut entry = BytesStart::new("problem");
        entry.push_attribute(("severity", problem.severity.to_string().as_str()));
        if let Some(line) = problem.line {
            entry.push_attribute(("line", line.to_string().as_str()));
        }
        if let Some(column) = problem.column {
            entry.push_attribute(("column", column.to_string().as_str()));
        }
        write_text_element(writer, entry, &problem.message)?;
    }
    writer.write_event(Event::End(BytesEnd::new(container)))?;
    Ok(())
}

/// Turns pipeline failures into fault responses
#[derive(Debug, Clone, Default)]
pub struct FaultHandler {
    include_details: bool,
}

impl FaultHandler {
    pub fn new(include_details: bool) -> Self {
        Self { include_details }
    }

    /// Replace the message with a fault for `error`, send it back and stop.
    ///
    /// Direction is taken from the context again, since the failure may have
    /// happened before analysis finished.
    pub fn handle_validation_problem(
        &self,
        ctx: &mut MessageContext,
        error: SoapValidationError,
    ) -> Mediation {
        let direction = Direction::from_context(ctx);
        let reason = fault_reason(&error);

        error!(%direction, version = %ctx.version(), reason = %reason, error = %error, "SOAP validation failed");
        for problem in error.problems() {
            error!(
                line = problem.line,
                column = problem.column,
                severity = %problem.severity,
                "{}",
                problem.message
            );
        }

        let details = if self.include_details {
            self.details(&error)
        } else {
            Vec::new()
        };

        let envelope = build_fault_envelope(ctx.version(), direction, &reason, &details)
            .unwrap_or_else(|e| {
                error!(error = %e, "Fault envelope could not be written, sending the fixed fault");
                fixed_fault_envelope(ctx.version(), direction)
            });
        ctx.replace_envelope(envelope);
        ctx.send_back();

        Mediation::Stop(error)
    }

    fn details(&self, error: &SoapValidationError) -> Vec<ValidationProblem> {
        if !error.problems().is_empty() {
            return error.problems().to_vec();
        }
        vec![ValidationProblem {
            message: error.to_string(),
            line: None,
            column: None,
            severity: Severity::Error,
        }]
    }
}
