//! Operation matching: which WSDL operation does a message address?

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{Result, SoapValidationError};
use crate::wsdl::{OperationInfo, ServiceInfo};
use crate::xml::QName;

/// The service and operation a message was matched to
#[derive(Debug, Clone)]
pub struct MatchedOperation {
    service: Arc<ServiceInfo>,
    operation: Arc<OperationInfo>,
}

impl MatchedOperation {
    pub fn new(service: Arc<ServiceInfo>, operation: Arc<OperationInfo>) -> Self {
        Self { service, operation }
    }

    pub fn service(&self) -> &Arc<ServiceInfo> {
        &self.service
    }

    pub fn operation(&self) -> &Arc<OperationInfo> {
        &self.operation
    }

    /// Same service and operation, by name.
    ///
    /// An operation bound by several bindings is still one target.
    pub fn same_target(&self, other: &MatchedOperation) -> bool {
        self.service.name() == other.service.name()
            && self.operation.name() == other.operation.name()
    }
}

pub struct OperationMatcher;

impl OperationMatcher {
    /// Scan every operation of every binding of every service.
    ///
    /// A non-empty `action` matches an operation declaring exactly that
    /// action. `body` matches an operation when it names an element part of
    /// the input, the output or any fault. Later matches replace earlier
    /// ones. When both criteria match they must agree on the target.
    pub fn find(
        services: &[Arc<ServiceInfo>],
        action: Option<&str>,
        body: Option<&QName>,
    ) -> Result<Option<MatchedOperation>> {
        let action = action.filter(|a| !a.is_empty());
        let mut by_action: Option<MatchedOperation> = None;
        let mut by_body: Option<MatchedOperation> = None;

        for service in services {
            for binding in service.bindings() {
                for operation in binding.operations() {
                    if action.is_some() && operation.action() == action {
                        by_action = Some(MatchedOperation::new(
                            Arc::clone(service),
                            Arc::clone(operation),
                        ));
                    }
                    if body.is_some_and(|name| declares_element(operation, name)) {
                        by_body = Some(MatchedOperation::new(
                            Arc::clone(service),
                            Arc::clone(operation),
                        ));
                    }
                }
            }
        }

        match (by_action, by_body) {
            (None, None) => {
                debug!("No operation matched");
                Ok(None)
            }
            (Some(matched), None) | (None, Some(matched)) => {
                debug!(
                    service = %matched.service().name(),
                    operation = %matched.operation().name(),
                    "Operation matched"
                );
                Ok(Some(matched))
            }
            (Some(by_action), Some(by_body)) => {
                if by_action.same_target(&by_body) {
                    debug!(
                        service = %by_action.service().name(),
                        operation = %by_action.operation().name(),
                        "Operation matched by action and body"
                    );
                    return Ok(Some(by_action));
                }

                error!(
                    action_operation = %by_action.operation().name(),
                    body_operation = %by_body.operation().name(),
                    "Action and body address different operations"
                );
                Err(SoapValidationError::Conflict {
                    details: format!(
                        "action targets {} in service {}, body targets {} in service {}",
                        by_action.operation().name(),
                        by_action.service().name(),
                        by_body.operation().name(),
                        by_body.service().name()
                    ),
                })
            }
        }
    }
}

fn declares_element(operation: &OperationInfo, name: &QName) -> bool {
    operation
        .input()
        .into_iter()
        .chain(operation.output())
        .chain(operation.faults())
        .flat_map(|message| message.parts())
        .any(|part| part.element_name() == Some(name))
}
