use serde::{Deserialize, Serialize};
use thiserror::Error;

/* ===== errors ===== */

/// The closed error set of the mapping layer. Backend engines report
/// failures with LDAP-style numeric result codes; we model those as a
/// typed enum so that callers branch on variants rather than comparing
/// integers inline. [`LdbError::result_code`] recovers the wire code.
#[derive(Serialize, Deserialize, Debug, Clone, Error)]
#[serde(rename_all = "lowercase")]
pub enum LdbError {
    /// The DN is not under the naming context this operation expected.
    #[error("dn is outside the mapped naming context")]
    DnNotInScope,
    #[error("no such object")]
    NoSuchObject,
    #[error("entry already exists")]
    EntryAlreadyExists,
    #[error("insufficient access rights")]
    InsufficientAccessRights,
    #[error("constraint violation")]
    ConstraintViolation,
    #[error("attribute or value exists")]
    AttributeOrValueExists,
    #[error("invalid attribute syntax: {0}")]
    InvalidAttributeSyntax(String),
    #[error("invalid dn syntax: {0}")]
    InvalidDnSyntax(String),
    #[error("not allowed on non-leaf")]
    NotAllowedOnNonLeaf,
    #[error("unwilling to perform")]
    UnwillingToPerform,
    #[error("operations error: {0}")]
    OperationsError(String),
    /// Compensation after a partial cross-backend failure has itself
    /// failed. The two stores are divergent and require operator
    /// intervention; this must never be retried automatically.
    #[error("cross-backend stores are divergent: {0}")]
    CrossBackendInconsistency(String),
}

impl PartialEq for LdbError {
    fn eq(&self, other: &Self) -> bool {
        // Payloads are diagnostic text only. Generally we only use the
        // PartialEq for TESTING anyway.
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for LdbError {}

impl LdbError {
    /// The LDAP result code this error is reported as on the wire.
    pub fn result_code(&self) -> u32 {
        match self {
            LdbError::OperationsError(_) => 1,
            LdbError::ConstraintViolation => 19,
            LdbError::AttributeOrValueExists => 20,
            LdbError::InvalidAttributeSyntax(_) => 21,
            LdbError::NoSuchObject => 32,
            LdbError::InvalidDnSyntax(_) => 34,
            LdbError::InsufficientAccessRights => 50,
            LdbError::UnwillingToPerform => 53,
            LdbError::NotAllowedOnNonLeaf => 66,
            LdbError::EntryAlreadyExists => 68,
            // Mapping-layer conditions with no direct protocol
            // equivalent surface as "other".
            LdbError::DnNotInScope => 80,
            LdbError::CrossBackendInconsistency(_) => 80,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::LdbError;

    #[test]
    fn test_result_codes_are_stable() {
        assert_eq!(LdbError::NoSuchObject.result_code(), 32);
        assert_eq!(LdbError::EntryAlreadyExists.result_code(), 68);
        assert_eq!(LdbError::InsufficientAccessRights.result_code(), 50);
        assert_eq!(LdbError::AttributeOrValueExists.result_code(), 20);
        assert_eq!(LdbError::NotAllowedOnNonLeaf.result_code(), 66);
        assert_eq!(LdbError::UnwillingToPerform.result_code(), 53);
    }

    #[test]
    fn test_eq_ignores_payload() {
        assert_eq!(
            LdbError::OperationsError("a".to_string()),
            LdbError::OperationsError("b".to_string())
        );
        assert_ne!(LdbError::NoSuchObject, LdbError::UnwillingToPerform);
    }

    #[test]
    fn test_serde_round_trip() {
        let e = LdbError::CrossBackendInconsistency("remote add lost".to_string());
        let s = serde_json::to_string(&e).expect("serialise");
        let d: LdbError = serde_json::from_str(&s).expect("deserialise");
        assert_eq!(e, d);
    }
}
