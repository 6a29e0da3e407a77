//! Route Origin Authorizations.
//!
//! A ROA binds a set of IP prefixes to the AS number that is allowed to
//! originate routes for them. The CMS envelope of a ROA is unwrapped by
//! the signed-object layer elsewhere; what arrives here is the record the
//! coverage validator cares about: the origin AS, the prefixes, and the
//! key identifiers of the embedded end-entity certificate.

use crate::asres::AsId;
use crate::ipres::{AddressFamily, Prefix};
use crate::x509::{KeyIdentifier, Time, ValidationError};


//------------ Roa -----------------------------------------------------------

/// The validation-relevant content of a Route Origin Authorization.
#[derive(Clone, Debug)]
pub struct Roa {
    ski: KeyIdentifier,
    aki: KeyIdentifier,
    expires: Time,
    asid: AsId,
    prefixes: Vec<RoaPrefix>,

    /// The name of the trust anchor this ROA hangs off.
    ///
    /// Set by the validator once the ROA’s prefixes have been found
    /// covered by its certificate chain.
    tal: Option<String>,
}

impl Roa {
    pub fn new(
        ski: KeyIdentifier,
        aki: KeyIdentifier,
        expires: Time,
        asid: AsId,
        prefixes: Vec<RoaPrefix>,
    ) -> Self {
        Roa { ski, aki, expires, asid, prefixes, tal: None }
    }

    pub fn ski(&self) -> KeyIdentifier {
        self.ski
    }

    pub fn aki(&self) -> KeyIdentifier {
        self.aki
    }

    pub fn expires(&self) -> Time {
        self.expires
    }

    pub fn asid(&self) -> AsId {
        self.asid
    }

    pub fn prefixes(&self) -> &[RoaPrefix] {
        &self.prefixes
    }

    pub fn tal(&self) -> Option<&str> {
        self.tal.as_deref()
    }

    pub(crate) fn set_tal(&mut self, tal: Option<String>) {
        self.tal = tal;
    }
}


//------------ RoaPrefix -----------------------------------------------------

/// A single prefix asserted by a ROA.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RoaPrefix {
    family: AddressFamily,
    prefix: Prefix,

    /// The longest more specific prefix the AS may announce.
    max_length: Option<u8>,
}

impl RoaPrefix {
    /// Creates a prefix, checking the max length against the prefix.
    ///
    /// RFC 6482 requires the max length to lie between the prefix length
    /// and the address length of the family.
    pub fn new(
        family: AddressFamily,
        prefix: Prefix,
        max_length: Option<u8>,
    ) -> Result<Self, ValidationError> {
        if prefix.len() > family.length() {
            return Err(ValidationError)
        }
        if let Some(max_length) = max_length {
            if max_length < prefix.len() || max_length > family.length() {
                return Err(ValidationError)
            }
        }
        Ok(RoaPrefix { family, prefix, max_length })
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    pub fn max_length(&self) -> Option<u8> {
        self.max_length
    }

    /// Returns the address interval covered by the prefix itself.
    pub fn range(&self) -> (u128, u128) {
        (self.prefix.min(), self.prefix.max())
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn max_length_bounds() {
        let prefix = Prefix::new(10u128 << 120, 8);
        assert!(
            RoaPrefix::new(AddressFamily::Ipv4, prefix, Some(24)).is_ok()
        );
        assert!(
            RoaPrefix::new(AddressFamily::Ipv4, prefix, Some(4)).is_err()
        );
        assert!(
            RoaPrefix::new(AddressFamily::Ipv4, prefix, Some(33)).is_err()
        );
        assert!(RoaPrefix::new(AddressFamily::Ipv4, prefix, None).is_ok());
    }
}
