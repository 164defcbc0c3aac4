use serde_json::Value;

use crate::error::MatrixError;
use crate::keyset::{extraneous_paths, keyset, missing_paths};

/// Checks that `variant` has exactly the structure of `base`.
///
/// Only key presence and nesting are compared, including the maps held by
/// arrays. A key path in the parameter specification that does not exist in
/// the base config surfaces here.
pub fn validate(variant: &Value, base: &Value) -> Result<(), MatrixError> {
    if keyset(variant) == keyset(base) {
        return Ok(());
    }
    Err(MatrixError::SchemaMismatch {
        only_in_variant: extraneous_paths(variant, base),
        only_in_base: missing_paths(variant, base),
    })
}
