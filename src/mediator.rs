//! Host pipeline boundary: one call per message, one verdict back.

use std::sync::Arc;

use tracing::{debug, info};

use crate::analyzer::{AnalysisResult, SoapAnalyzer};
use crate::error::{Result, SoapValidationError};
use crate::fault::FaultHandler;
use crate::message::MessageContext;
use crate::resolver::SchemaResolver;
use crate::validator::SoapValidator;

/// Verdict returned to the host pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Mediation {
    /// The message is valid or needs no validation.
    Continue,
    /// A fault was put in place of the message and sent back.
    Stop(SoapValidationError),
}

impl Mediation {
    pub fn should_continue(&self) -> bool {
        matches!(self, Mediation::Continue)
    }
}

/// Validates SOAP messages against the schema of the operation they address
pub struct SoapValidationMediator {
    resolver: Arc<SchemaResolver>,
    validator: SoapValidator,
    faults: FaultHandler,
}

impl SoapValidationMediator {
    pub fn new(resolver: Arc<SchemaResolver>, faults: FaultHandler) -> Self {
        Self {
            resolver,
            validator: SoapValidator::new(),
            faults,
        }
    }

    pub fn resolver(&self) -> &Arc<SchemaResolver> {
        &self.resolver
    }

    /// Validate the message in `ctx` for API `api_id`.
    ///
    /// Never fails: every error is turned into a fault response and reported
    /// as [`Mediation::Stop`].
    pub async fn mediate(&self, api_id: &str, ctx: &mut MessageContext) -> Mediation {
        match self.validate_message(api_id, ctx).await {
            Ok(()) => Mediation::Continue,
            Err(error) => self.faults.handle_validation_problem(ctx, error),
        }
    }

    async fn validate_message(&self, api_id: &str, ctx: &MessageContext) -> Result<()> {
        let message = match SoapAnalyzer::analyze(ctx)? {
            AnalysisResult::Fault => {
                debug!(api_id, "Fault response, nothing to validate");
                return Ok(());
            }
            AnalysisResult::Message(message) => message,
        };

        let schema = self.resolver.resolve(api_id, &message).await?;

        let validator = self.validator.clone();
        let body = message.body().clone();
        let problems = tokio::task::spawn_blocking(move || validator.validate(&schema, &body))
            .await
            .map_err(|e| SoapValidationError::Concurrency {
                details: format!("Validation task failed: {}", e),
            })??;

        if !problems.is_empty() {
            return Err(SoapValidationError::SchemaViolation { problems });
        }

        info!(
            api_id,
            direction = %message.direction(),
            body = %message.body_name(),
            "SOAP payload conforms to schema"
        );
        Ok(())
    }
}
