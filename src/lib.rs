//! # soap-validate Library
//!
//! Validates SOAP messages flowing through an API gateway against the XML
//! Schemas declared by the API's WSDL contract. Service models and compiled
//! schemas are built once per API and operation and shared by every
//! concurrent message.
//!
//! The entry point for a host pipeline is [`SoapValidationMediator::mediate`],
//! which either lets a message continue or replaces it with a SOAP fault.

pub mod analyzer;
pub mod cache;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod error;
pub mod fault;
pub mod http_client;
pub mod libxml2;
pub mod matcher;
pub mod mediator;
pub mod message;
pub mod output;
pub mod registry;
pub mod resolver;
pub mod validator;
pub mod wsdl;
pub mod xml;

pub use analyzer::{AnalysisResult, AnalyzedMessage, SoapAnalyzer};
pub use cache::{CacheConfig, CompiledSchemaCache, ResolverCache, SchemaKey, ServiceModelCache};
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use compiler::{CompiledSchema, SchemaCompiler, SchemaSet};
pub use config::{Config, ConfigError, ConfigManager};
pub use error::{BodyScope, DocumentError, LibXml2Error, SoapValidationError, WsdlError};
pub use fault::{FaultHandler, build_fault_envelope, fault_reason};
pub use http_client::{AsyncHttpClient, HttpClientConfig};
pub use libxml2::{LibXml2Wrapper, XmlSchemaPtr};
pub use matcher::{MatchedOperation, OperationMatcher};
pub use mediator::{Mediation, SoapValidationMediator};
pub use message::{Direction, MessageContext, SoapVersion};
pub use output::{Output, ValidationReport, Verdict};
pub use registry::{DocumentSource, RegistryDocumentSource};
pub use resolver::{ResolverStats, SchemaResolver};
pub use validator::{Severity, SoapValidator, ValidationProblem};
pub use wsdl::{
    BindingInfo, MessageInfo, MessagePart, OperationInfo, SchemaFragment, ServiceInfo,
    ServiceModel, WsdlServiceBuilder,
};
pub use xml::{QName, XmlElement};
