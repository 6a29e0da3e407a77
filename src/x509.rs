//! Bits and pieces of X.509 certificates.
//!
//! This module provides the parts of a certificate that are not specific
//! to RPKI resource certificates: the signed-data envelope, names, times,
//! key identifiers, and the subject public key info. Everything here
//! follows the profile of RFC 5280 as narrowed down by RFC 6487 and
//! RFC 8608.

use std::{error, fmt, str};
use std::str::FromStr;
use bcder::{decode, xerr};
use bcder::{BitString, Captured, Mode, OctetString, Oid, Tag};
use chrono::{DateTime, LocalResult, TimeZone, Utc};


//------------ SignedData ----------------------------------------------------

/// The outer structure of a certificate: data, algorithm, signature.
///
/// ```text
/// Certificate  ::=  SEQUENCE  {
///      tbsCertificate       TBSCertificate,
///      signatureAlgorithm   AlgorithmIdentifier,
///      signatureValue       BIT STRING  }
/// ```
///
/// The to-be-signed data is kept as the raw captured value so that the
/// signature can be checked over exactly the bytes that appeared on the
/// wire.
#[derive(Clone, Debug)]
pub struct SignedData {
    data: Captured,
    signature_algorithm: SignatureAlgorithm,
    signature_value: BitString,
}

impl SignedData {
    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        cons.take_sequence(Self::from_constructed)
    }

    pub fn from_constructed<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        Ok(SignedData {
            data: cons.capture_one()?,
            signature_algorithm: SignatureAlgorithm::take_from(cons)?,
            signature_value: BitString::take_from(cons)?,
        })
    }

    /// Returns the raw bytes of the data covered by the signature.
    pub fn data(&self) -> &Captured {
        &self.data
    }

    /// Verifies the signature over the data with the given RSA key bits.
    pub fn verify_signature(
        &self, public_key: &[u8]
    ) -> Result<(), ValidationError> {
        if self.signature_value.unused() != 0 {
            return Err(ValidationError)
        }
        let signature: Vec<u8> = self.signature_value.octets().collect();
        ::ring::signature::verify(
            &::ring::signature::RSA_PKCS1_2048_8192_SHA256,
            ::untrusted::Input::from(public_key),
            ::untrusted::Input::from(self.data.as_ref()),
            ::untrusted::Input::from(&signature),
        ).map_err(|_| ValidationError)
    }
}


//------------ SignatureAlgorithm --------------------------------------------

/// The algorithm of the signature over a certificate.
///
/// RFC 7935 limits this to sha256WithRSAEncryption. Some certificates
/// carry the bare rsaEncryption identifier instead, so both are accepted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureAlgorithm {
    Sha256WithRsaEncryption
}

impl SignatureAlgorithm {
    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        cons.take_sequence(Self::take_content_from)
    }

    pub fn take_content_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        let alg = Oid::take_from(cons)?;
        if alg != oid::SHA256_WITH_RSA_ENCRYPTION
            && alg != oid::RSA_ENCRYPTION
        {
            xerr!(return Err(decode::Error::Malformed.into()))
        }
        skip_opt_null(cons)?;
        Ok(SignatureAlgorithm::Sha256WithRsaEncryption)
    }
}


//------------ PublicKeyAlgorithm --------------------------------------------

/// The algorithm of a subject public key.
///
/// CA and trust anchor keys are RSA (RFC 7935), BGPsec router keys are
/// ECDSA on the P-256 curve (RFC 8608).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PublicKeyAlgorithm {
    RsaEncryption,
    EcPublicKey,
}

impl PublicKeyAlgorithm {
    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        cons.take_sequence(Self::take_content_from)
    }

    pub fn take_content_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        let alg = Oid::take_from(cons)?;
        if alg == oid::RSA_ENCRYPTION {
            skip_opt_null(cons)?;
            Ok(PublicKeyAlgorithm::RsaEncryption)
        }
        else if alg == oid::EC_PUBLIC_KEY {
            // The parameters have to name the one allowed curve.
            oid::SECP256R1.skip_if(cons)?;
            Ok(PublicKeyAlgorithm::EcPublicKey)
        }
        else {
            xerr!(Err(decode::Error::Malformed.into()))
        }
    }
}


//------------ SubjectPublicKeyInfo ------------------------------------------

/// The complete public key information of a certificate.
///
/// The raw DER rendering is kept around: a trust anchor is authenticated
/// by comparing it byte-for-byte with the key provided via the TAL, and
/// BGPsec router keys are passed on in exactly this form.
#[derive(Clone, Debug)]
pub struct SubjectPublicKeyInfo {
    raw: Captured,
    algorithm: PublicKeyAlgorithm,
    subject_public_key: BitString,
}

impl SubjectPublicKeyInfo {
    pub fn decode<S: decode::Source>(source: S) -> Result<Self, S::Err> {
        Mode::Der.decode(source, Self::take_from)
    }

    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        let raw = cons.capture_one()?;
        let (algorithm, subject_public_key) = raw.clone().decode(|cons| {
            cons.take_sequence(|cons| {
                Ok((
                    PublicKeyAlgorithm::take_from(cons)?,
                    BitString::take_from(cons)?,
                ))
            })
        }).map_err(Into::into)?;
        Ok(SubjectPublicKeyInfo { raw, algorithm, subject_public_key })
    }

    /// Returns the DER rendering of the complete key info.
    pub fn as_slice(&self) -> &[u8] {
        self.raw.as_ref()
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.algorithm
    }

    /// Returns the bare key bits of the subjectPublicKey field.
    pub fn key_bits(&self) -> Result<Vec<u8>, ValidationError> {
        if self.subject_public_key.unused() != 0 {
            return Err(ValidationError)
        }
        Ok(self.subject_public_key.octets().collect())
    }
}

impl PartialEq for SubjectPublicKeyInfo {
    fn eq(&self, other: &Self) -> bool {
        AsRef::<[u8]>::as_ref(&self.raw) == AsRef::<[u8]>::as_ref(&other.raw)
    }
}

impl Eq for SubjectPublicKeyInfo { }


//------------ Name ----------------------------------------------------------

/// A distinguished name.
///
/// Names are not relevant for RPKI validation, so the value is simply
/// captured and carried along.
#[derive(Clone, Debug)]
pub struct Name(Captured);

impl Name {
    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        cons.capture_one().map(Name)
    }
}


//------------ KeyIdentifier -------------------------------------------------

/// A key identifier: the 160 bit SHA-1 hash over the subject public key.
///
/// Both the subject key identifier and the authority key identifier of a
/// certificate are values of this type. The identifier doubles as the key
/// of the authority tree, ordered by its byte sequence which is the same
/// order as that of its hexadecimal rendering.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct KeyIdentifier([u8; 20]);

impl KeyIdentifier {
    /// The length of a key identifier in octets.
    pub const LEN: usize = 20;

    /// Creates an identifier from a slice of exactly 20 octets.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != Self::LEN {
            return None
        }
        let mut res = [0u8; 20];
        res.copy_from_slice(slice);
        Some(KeyIdentifier(res))
    }

    /// Takes an identifier wrapped in an octet string from a source.
    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        let id = OctetString::take_from(cons)?;
        let bytes = id.to_bytes();
        match Self::from_slice(bytes.as_ref()) {
            Some(res) => Ok(res),
            None => xerr!(Err(decode::Error::Malformed.into()))
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for KeyIdentifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for ch in &self.0 {
            write!(f, "{:02x}", ch)?
        }
        Ok(())
    }
}

impl fmt::Debug for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "KeyIdentifier({})", self)
    }
}

impl FromStr for KeyIdentifier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::LEN * 2 || !s.is_ascii() {
            return Err(ValidationError)
        }
        let mut res = [0u8; 20];
        for (i, item) in res.iter_mut().enumerate() {
            *item = u8::from_str_radix(
                &s[i * 2..i * 2 + 2], 16
            ).map_err(|_| ValidationError)?;
        }
        Ok(KeyIdentifier(res))
    }
}


//------------ Time ----------------------------------------------------------

/// A point in time as used in certificate validity.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Time(DateTime<Utc>);

impl Time {
    pub fn new(time: DateTime<Utc>) -> Self {
        Time(time)
    }

    /// Takes a UTCTime or GeneralizedTime value from a source.
    ///
    /// RFC 5280 requires the formats `YYMMDDHHMMSSZ` and
    /// `YYYYMMDDHHMMSSZ`, respectively.
    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        cons.take_primitive(|tag, prim| {
            let text = prim.take_all()?;
            let res = if tag == Tag::UTC_TIME {
                Self::from_utc_text(text.as_ref())
            }
            else if tag == Tag::GENERALIZED_TIME {
                Self::from_generalized_text(text.as_ref())
            }
            else {
                xerr!(return Err(decode::Error::Malformed.into()))
            };
            res.map_err(Into::into)
        })
    }

    fn from_utc_text(text: &[u8]) -> Result<Self, decode::Error> {
        if text.len() != 13 || text[12] != b'Z' {
            xerr!(return Err(decode::Error::Malformed))
        }
        let year = parse_digits(&text[0..2])? as i32;
        let year = if year >= 50 { year + 1900 } else { year + 2000 };
        Self::from_parts(year, &text[2..12])
    }

    fn from_generalized_text(text: &[u8]) -> Result<Self, decode::Error> {
        if text.len() != 15 || text[14] != b'Z' {
            xerr!(return Err(decode::Error::Malformed))
        }
        let year = parse_digits(&text[0..4])? as i32;
        Self::from_parts(year, &text[4..14])
    }

    fn from_parts(year: i32, text: &[u8]) -> Result<Self, decode::Error> {
        let date = Utc.ymd_opt(
            year, parse_digits(&text[0..2])?, parse_digits(&text[2..4])?
        );
        let date = match date {
            LocalResult::Single(date) => date,
            _ => return Err(decode::Error::Malformed)
        };
        match date.and_hms_opt(
            parse_digits(&text[4..6])?,
            parse_digits(&text[6..8])?,
            parse_digits(&text[8..10])?,
        ) {
            Some(time) => Ok(Time(time)),
            None => Err(decode::Error::Malformed)
        }
    }

    /// Returns the time as a Unix timestamp.
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }

    /// Creates a time from a Unix timestamp.
    pub fn from_timestamp(secs: i64) -> Result<Self, ValidationError> {
        match Utc.timestamp_opt(secs, 0) {
            LocalResult::Single(time) => Ok(Time(time)),
            _ => Err(ValidationError)
        }
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn parse_digits(slice: &[u8]) -> Result<u32, decode::Error> {
    let s = str::from_utf8(slice).map_err(|_| decode::Error::Malformed)?;
    u32::from_str(s).map_err(|_| decode::Error::Malformed)
}


//------------ Helpers -------------------------------------------------------

/// Skips over an optional NULL value.
fn skip_opt_null<S: decode::Source>(
    cons: &mut decode::Constructed<S>
) -> Result<(), S::Err> {
    cons.take_opt_primitive_if(Tag::NULL, |prim| prim.skip_all())?;
    Ok(())
}

/// Updates an optional value that may only be set once.
///
/// This is used when parsing certificate extensions: a second extension
/// of a kind we interpret is treated as an error rather than silently
/// shadowing the first.
pub fn update_once<F, T, E>(opt: &mut Option<T>, op: F) -> Result<(), E>
where F: FnOnce() -> Result<T, E>, E: From<decode::Error> {
    if opt.is_some() {
        Err(decode::Error::Malformed.into())
    }
    else {
        *opt = Some(op()?);
        Ok(())
    }
}


//------------ ValidationError -----------------------------------------------

/// An error happened while validating an object.
#[derive(Clone, Copy, Debug)]
pub struct ValidationError;

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("validation error")
    }
}

impl error::Error for ValidationError { }


//------------ OIDs ----------------------------------------------------------

mod oid {
    use bcder::{ConstOid, Oid};

    pub const RSA_ENCRYPTION: ConstOid
        = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 1]);
    pub const SHA256_WITH_RSA_ENCRYPTION: ConstOid
        = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 11]);
    pub const EC_PUBLIC_KEY: ConstOid = Oid(&[42, 134, 72, 206, 61, 2, 1]);
    pub const SECP256R1: ConstOid = Oid(&[42, 134, 72, 206, 61, 3, 1, 7]);
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_identifier_str_round_trip() {
        let id = KeyIdentifier::from_slice(&[
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23,
            0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67,
        ]).unwrap();
        let text = id.to_string();
        assert_eq!(
            text,
            "0123456789abcdef0123456789abcdef01234567"
        );
        assert_eq!(KeyIdentifier::from_str(&text).unwrap(), id);
    }

    #[test]
    fn key_identifier_bad_input() {
        assert!(KeyIdentifier::from_slice(b"too short").is_none());
        assert!(KeyIdentifier::from_str("definitely not hex").is_err());
        assert!(
            KeyIdentifier::from_str(
                "0123456789abcdef0123456789abcdef012345"
            ).is_err()
        );
    }

    #[test]
    fn time_from_text() {
        let time = Time::from_utc_text(b"250416120815Z").unwrap();
        assert_eq!(time.timestamp(), 1744805295);
        let time = Time::from_generalized_text(b"20250416120815Z").unwrap();
        assert_eq!(time.timestamp(), 1744805295);
        assert!(Time::from_utc_text(b"2504161208Z").is_err());
        assert!(Time::from_generalized_text(b"20251301000000Z").is_err());
    }

    #[test]
    fn time_timestamp_round_trip() {
        let time = Time::from_timestamp(1744805295).unwrap();
        assert_eq!(time.timestamp(), 1744805295);
    }
}
