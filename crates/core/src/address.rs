//! Outbound channel addresses.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_LEN: usize = 64;

/// A syntactically valid email address.
///
/// Validation is intentionally shallow (shape only, no DNS): an address that fails
/// here can never be delivered, so callers treat the failure as permanent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl ValueObject for EmailAddress {}

impl EmailAddress {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let candidate = raw.trim();
        if candidate.is_empty() {
            return Err(DomainError::validation("email address is empty"));
        }
        if candidate.len() > MAX_ADDRESS_LEN {
            return Err(DomainError::validation("email address is too long"));
        }
        if candidate.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DomainError::validation(
                "email address contains whitespace or control characters",
            ));
        }

        let Some((local, domain)) = candidate.split_once('@') else {
            return Err(DomainError::validation("email address is missing '@'"));
        };
        if local.is_empty() || local.len() > MAX_LOCAL_LEN {
            return Err(DomainError::validation("email local part is empty or too long"));
        }
        if domain.contains('@') {
            return Err(DomainError::validation("email address contains more than one '@'"));
        }
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
            return Err(DomainError::validation(format!(
                "email domain '{domain}' is not a valid host name"
            )));
        }

        Ok(Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Redacted form for logs and dead-letter snapshots: `j***@example.com`.
    pub fn masked(&self) -> String {
        mask_address(&self.0)
    }
}

/// Mask the local part of anything that looks like an address.
///
/// Works on unvalidated input too, so redaction never depends on validation passing.
pub fn mask_address(raw: &str) -> String {
    match raw.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}

impl core::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EmailAddress {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_addresses() {
        let addr = EmailAddress::parse("  buyer@example.com ").unwrap();
        assert_eq!(addr.as_str(), "buyer@example.com");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for raw in [
            "",
            "no-at-sign",
            "@example.com",
            "a@b@example.com",
            "user@localhost",
            "user@example..com",
            "us er@example.com",
        ] {
            assert!(EmailAddress::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn masks_local_part() {
        let addr = EmailAddress::parse("jane.doe@example.com").unwrap();
        assert_eq!(addr.masked(), "j***@example.com");
        assert_eq!(mask_address("garbage"), "***");
    }

    #[test]
    fn deserialization_validates() {
        let ok: Result<EmailAddress, _> = serde_json::from_str("\"a@example.org\"");
        assert!(ok.is_ok());
        let bad: Result<EmailAddress, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: masking never leaks more than the first character of the local part.
            #[test]
            fn masking_hides_local_part(
                local in "[a-z]{2,20}",
                domain in "[a-z]{1,10}\\.[a-z]{2,4}"
            ) {
                let addr = EmailAddress::parse(&format!("{local}@{domain}")).unwrap();
                let masked = addr.masked();
                let masked_local = masked.split('@').next().unwrap_or_default();
                prop_assert!(!masked_local.contains(&local));
                let domain_suffix = format!("@{domain}");
                prop_assert!(masked.ends_with(&domain_suffix));
            }
        }
    }
}
