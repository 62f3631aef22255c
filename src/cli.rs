use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::message::MessageContext;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only the verdict
    Quiet,
    /// Verdict and fault envelope
    #[default]
    Normal,
    /// Everything, including resolver statistics
    Verbose,
}

/// How the verdict is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Validate a SOAP envelope against the WSDL of the API it is sent to
#[derive(Parser, Debug, Clone)]
#[command(name = "soap-validate")]
#[command(about = "Validate SOAP messages against the schemas declared by an API's WSDL")]
#[command(version)]
pub struct Cli {
    /// SOAP envelope to validate
    #[arg(help = "File holding the SOAP envelope")]
    pub envelope: PathBuf,

    /// API identifier the message is addressed to
    #[arg(long = "api", help = "API identifier (directory name in the registry)")]
    pub api: String,

    /// Registry root holding the API contracts
    #[arg(long = "registry")]
    pub registry: Option<PathBuf>,

    /// SOAPAction transport header value
    #[arg(long = "action")]
    pub action: Option<String>,

    /// Treat the message as a response
    #[arg(long = "response")]
    pub response: bool,

    /// Treat the message as a fault response (never validated)
    #[arg(long = "fault-response")]
    pub fault_response: bool,

    /// Output format
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// List every validation problem inside the fault
    #[arg(long = "fault-details")]
    pub fault_details: bool,

    /// HTTP request timeout in seconds for remote documents
    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (verdict only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.envelope.is_file() {
            return Err(format!(
                "Envelope file does not exist: {}",
                self.envelope.display()
            ));
        }
        if self.api.trim().is_empty() {
            return Err("API identifier must not be empty".to_string());
        }
        if let Some(registry) = &self.registry
            && !registry.is_dir()
        {
            return Err(format!(
                "Registry directory does not exist: {}",
                registry.display()
            ));
        }
        Ok(())
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Wrap `envelope` in a message context carrying the transport flags
    pub fn message_context(&self, envelope: String) -> crate::error::Result<MessageContext> {
        let mut ctx = MessageContext::new(envelope)?;
        if let Some(action) = &self.action {
            ctx = ctx.with_soap_action(action.clone());
        }
        if self.fault_response {
            ctx = ctx.as_fault_response();
        } else if self.response {
            ctx = ctx.as_response();
        }
        Ok(ctx)
    }
}
