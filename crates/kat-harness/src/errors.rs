//! Harness error types.
//!
//! Only expansion and configuration errors abort a run. Deployment errors
//! are contained to the affected root, and query errors never leave the
//! scheduler: they become failed [`crate::QueryResult`]s.

use crate::config::ConfigError;
use crate::template::TemplateError;
use thiserror::Error;

/// Variant expansion and tree construction errors. Always fatal.
#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("Class '{class}' declares no variant axes and has no default axis")]
    NoAxes { class: String },

    #[error("Class '{class}' has an empty '{axis}' axis")]
    EmptyAxis { class: String, axis: String },

    #[error("Class '{class}' needs a service type but none is registered")]
    NoServiceType { class: String },

    #[error("Class '{class}' has an invalid name template: {source}")]
    NameTemplate {
        class: String,
        #[source]
        source: TemplateError,
    },

    #[error("Class '{class}' generated duplicate variant name '{name}'")]
    DuplicateVariant { class: String, name: String },

    #[error("Node name '{name}' is not unique within deployment '{root}'")]
    DuplicateNode { root: String, name: String },

    #[error("Root class '{class}' must be a gateway class")]
    NotAGateway { class: String },
}

/// Errors turning a node tree into a deployment bundle.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Template error in node '{node}': {source}")]
    Template {
        node: String,
        #[source]
        source: TemplateError,
    },

    #[error("Invalid YAML from node '{node}': {message}")]
    InvalidYaml { node: String, message: String },

    #[error("Document from node '{node}' is missing required field '{field}'")]
    MissingField { node: String, field: &'static str },

    #[error("Option field from node '{node}' has no parent mapping")]
    OrphanField { node: String },

    #[error("Node '{node}' addresses configuration to unknown owner '{owner}'")]
    UnknownOwner { node: String, owner: String },

    #[error("Failed to render bundle: {0}")]
    Render(String),
}

/// Deployment errors. Fatal for the affected root's subtree only.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Configuration rejected before deployment: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Deployment driver rejected bundle: {0}")]
    Rejected(String),

    #[error("Failed to run deployment command: {0}")]
    Command(String),

    #[error("Deployment not ready within {timeout_secs}s; pending: {pending:?}")]
    NotReady {
        timeout_secs: u64,
        pending: Vec<String>,
    },
}

/// Top-level harness error.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Expansion(#[from] ExpansionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build transport: {0}")]
    Transport(String),
}
