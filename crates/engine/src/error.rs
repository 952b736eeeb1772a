//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the DAG run engine (spec errors are surfaced by the
/// loader and never reach these variants; this covers validation performed
/// at run-construction time plus infrastructure failures during a run).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Spec / validation errors ------
    #[error("duplicate step name: '{0}'")]
    DuplicateStepName(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("workflow graph contains a cycle")]
    CycleDetected,

    #[error("step '{step}' is targeted by multiple routes")]
    DuplicateRouteTarget { step: String },

    #[error("router step '{step}' targets unknown step '{target}'")]
    UnknownRouteTarget { step: String, target: String },

    #[error("executor does not support multiple commands")]
    MultiCommandUnsupported,

    #[error("duplicate DAG name in multi-document spec: '{0}'")]
    DuplicateDagName(String),

    #[error("YAML document stream contained no workflow definitions")]
    EmptySpec,

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    TemplateError(String),

    // ------ Execution errors (rare at this layer; node_executor consumes
    //        most of these locally and only the terminal outcome bubbles up) ------
    #[error("node '{node_id}' failed fatally: {message}")]
    NodeFatal { node_id: String, message: String },

    #[error("node '{node_id}' exceeded retry limit: {message}")]
    NodeRetryExhausted { node_id: String, message: String },

    // ------ Infrastructure errors ------
    #[error("status store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("node plugin error: {0}")]
    Node(#[from] nodes::NodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
