//! Error types for graph-fuser
//!
//! A failed match is never an error. Everything here is either a
//! pattern-definition bug caught at construction time, a malformed op graph,
//! or a fused-op factory that could not fold the attributes it needed.

use thiserror::Error;

/// Main error type for pattern construction, registration and rewriting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FuseError {
    // ------------------------------------------------------------------
    // Pattern-definition errors
    // ------------------------------------------------------------------
    /// An alternation was declared with no candidate kinds
    #[error("Empty alternation in pattern graph '{0}'")]
    EmptyAlternation(String),

    /// A pattern graph port index was declared twice
    #[error("Duplicate {direction} port {index} in pattern graph '{graph}'")]
    DuplicatePort {
        /// Pattern graph name
        graph: String,
        /// "input" or "output"
        direction: &'static str,
        /// Port index
        index: usize,
    },

    /// Two edges (or an edge and an exposed port) target the same input port
    #[error("Input port {port} of pattern node {node} in '{graph}' is wired twice")]
    DuplicateInEdge {
        /// Pattern graph name
        graph: String,
        /// Pattern node index
        node: usize,
        /// Input port
        port: usize,
    },

    /// An edge or port refers past the ports a nested block declares
    #[error("Port {port} out of range for pattern node {node} in '{graph}' (declares {available})")]
    PortOutOfRange {
        /// Pattern graph name
        graph: String,
        /// Pattern node index
        node: usize,
        /// Requested port
        port: usize,
        /// Number of ports declared
        available: usize,
    },

    /// Handle does not belong to this pattern graph
    #[error("Unknown pattern node {node} in '{graph}'")]
    UnknownPatternNode {
        /// Pattern graph name
        graph: String,
        /// Pattern node index
        node: usize,
    },

    /// Repetition bounds are inconsistent
    #[error("Invalid repetition in '{graph}': {reason}")]
    InvalidRepetition {
        /// Pattern graph name
        graph: String,
        /// Description
        reason: String,
    },

    /// Optional block body does not declare a matching port set
    #[error("Invalid optional block in '{graph}': {reason}")]
    InvalidOptional {
        /// Pattern graph name
        graph: String,
        /// Description
        reason: String,
    },

    /// Pattern graph has no nodes
    #[error("Pattern graph '{0}' is empty")]
    EmptyPattern(String),

    /// Decision functions can only be attached to concrete matchers
    #[error("Pattern node {node} in '{graph}' is not an op matcher")]
    NotAnOpMatcher {
        /// Pattern graph name
        graph: String,
        /// Pattern node index
        node: usize,
    },

    // ------------------------------------------------------------------
    // Registry errors
    // ------------------------------------------------------------------
    /// A rule with this name is already registered
    #[error("Fusion rule '{0}' is already registered")]
    DuplicateRule(String),

    /// Priority must be a finite number
    #[error("Invalid priority {priority} for rule '{rule}'")]
    InvalidPriority {
        /// Rule name
        rule: String,
        /// Offending value
        priority: f32,
    },

    /// Rule was built without a fused-op factory
    #[error("Fusion rule '{0}' has no fused op factory")]
    MissingFusedOp(String),

    /// Rule was built without any pattern variant
    #[error("Fusion rule '{0}' has no pattern variants")]
    NoPatterns(String),

    // ------------------------------------------------------------------
    // Graph errors
    // ------------------------------------------------------------------
    /// Node id not present in the graph
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// Value id not present in the graph
    #[error("Unknown value: {0}")]
    UnknownValue(String),

    /// Node was already retired by an earlier commit
    #[error("Node {0} is retired")]
    RetiredNode(String),

    /// Graph failed a consistency check
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    // ------------------------------------------------------------------
    // Rewrite errors
    // ------------------------------------------------------------------
    /// A fused-op factory could not fold an attribute
    #[error("Invalid attribute '{name}': {reason}")]
    InvalidAttribute {
        /// Attribute name
        name: String,
        /// Description
        reason: String,
    },

    /// A replacement cannot be wired onto the matched region
    #[error("Invalid replacement for rule '{rule}': {reason}")]
    InvalidReplacement {
        /// Rule name
        rule: String,
        /// Description
        reason: String,
    },
}

/// Result type alias for graph-fuser operations
pub type FuseResult<T> = Result<T, FuseError>;

impl FuseError {
    /// Whether this error comes from a malformed pattern definition
    pub fn is_pattern_definition(&self) -> bool {
        matches!(
            self,
            FuseError::EmptyAlternation(_)
                | FuseError::DuplicatePort { .. }
                | FuseError::DuplicateInEdge { .. }
                | FuseError::PortOutOfRange { .. }
                | FuseError::UnknownPatternNode { .. }
                | FuseError::InvalidRepetition { .. }
                | FuseError::InvalidOptional { .. }
                | FuseError::EmptyPattern(_)
                | FuseError::NotAnOpMatcher { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FuseError::EmptyAlternation("int8_relu".to_string());
        assert!(err.to_string().contains("int8_relu"));
    }

    #[test]
    fn test_duplicate_port_display() {
        let err = FuseError::DuplicatePort {
            graph: "post_op".to_string(),
            direction: "input",
            index: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("input port 1"));
        assert!(msg.contains("post_op"));
    }

    #[test]
    fn test_is_pattern_definition() {
        assert!(FuseError::EmptyPattern("p".into()).is_pattern_definition());
        assert!(!FuseError::DuplicateRule("r".into()).is_pattern_definition());
        assert!(!FuseError::UnknownNode("n3".into()).is_pattern_definition());
    }
}
