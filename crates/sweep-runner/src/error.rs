use thiserror::Error;

/// Failures raised while turning a parameter specification into variants.
///
/// Every variant is fatal for the expansion it occurs in; callers decide what to
/// do with variants that were already materialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error(
        "invalid pairing for \"{axis}\" & \"{companion}\": expected {expected} values, found {found}"
    )]
    PairingLength {
        axis: String,
        companion: String,
        expected: usize,
        found: usize,
    },

    #[error("key not found: \"{segment}\" in key path \"{path}\"")]
    KeyNotFound { path: String, segment: String },

    #[error("generated config is invalid{}", render_mismatch(.only_in_variant, .only_in_base))]
    SchemaMismatch {
        only_in_variant: Vec<String>,
        only_in_base: Vec<String>,
    },

    #[error("repetitions must be >= 1 (found {0})")]
    InvalidRepetitions(i64),

    #[error("axis or companion key \"{0}\" is declared more than once")]
    DuplicateAxis(String),

    #[error("axis name \"{0}\" is reserved for the repetition suffix")]
    ReservedAxis(String),

    #[error("identifier collision: \"{identifier}\" is produced by more than one combination")]
    IdentifierCollision { identifier: String },

    #[error("malformed run identifier \"{name}\": {reason}")]
    MalformedIdentifier { name: String, reason: String },

    #[error("invalid naming scheme: {0}")]
    InvalidNaming(String),

    #[error("while applying {context}: {source}")]
    Apply {
        context: String,
        #[source]
        source: Box<MatrixError>,
    },
}

fn render_mismatch(only_in_variant: &[String], only_in_base: &[String]) -> String {
    let mut msg = String::new();
    if !only_in_variant.is_empty() {
        msg.push_str("\nOnly in generated config:");
        for key in only_in_variant {
            msg.push_str(&format!("\n > {}", key));
        }
    }
    if !only_in_base.is_empty() {
        msg.push_str("\nOnly in base config:");
        for key in only_in_base {
            msg.push_str(&format!("\n > {}", key));
        }
    }
    msg
}
