//! RPKI resource certificates.
//!
//! This module parses X.509 certificates that follow the profile of
//! RFC 6487: CA certificates (including trust anchors) and BGPsec router
//! certificates per RFC 8209. The outcome of a successful parse is a
//! [`Cert`]: a flat record of everything the validator needs, plus the
//! signed-data envelope for the case where the certificate still has to
//! be authenticated against a trust anchor key.
//!
//! Parsing happens in an untrusted worker process. The record travels to
//! the validator over a byte pipe via [`Cert::write`] and [`Cert::read`];
//! the reader re-establishes every invariant rather than trusting the
//! other side of the pipe.

use std::convert::TryFrom;
use std::io;
use bcder::{decode, xerr};
use bcder::{BitString, Mode, OctetString, Oid, Tag, Unsigned};
use bytes::Bytes;
use log::warn;
use crate::asres::{AsBlock, AsBlocks};
use crate::binio::{Compose, Parse, ParseError};
use crate::error::Failed;
use crate::ipres::{IpBlock, IpBlocks};
use crate::validate::valid_uri;
use crate::x509::{
    update_once, KeyIdentifier, Name, PublicKeyAlgorithm,
    SignatureAlgorithm, SignedData, SubjectPublicKeyInfo, Time,
};


//------------ Purpose -------------------------------------------------------

/// What a certificate is for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Purpose {
    /// A certificate authority, i.e., a CA or trust anchor certificate.
    Ca,

    /// A BGPsec router certificate per RFC 8209.
    BgpsecRouter,
}

impl Purpose {
    fn code(self) -> u8 {
        match self {
            Purpose::Ca => 0,
            Purpose::BgpsecRouter => 1,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Purpose::Ca),
            1 => Some(Purpose::BgpsecRouter),
            _ => None,
        }
    }
}


//------------ Cert ----------------------------------------------------------

/// A parsed resource certificate.
#[derive(Clone, Debug)]
pub struct Cert {
    /// The outer signed-data structure.
    ///
    /// Kept so that a trust anchor can be authenticated after parsing.
    /// Not carried across the process boundary.
    pub(crate) signed: Option<SignedData>,

    /// The complete subject public key info.
    pub(crate) spki: Option<SubjectPublicKeyInfo>,

    /// Whether the SIA extension was present at all.
    pub(crate) sia_present: bool,

    pub(crate) ski: KeyIdentifier,
    pub(crate) aki: Option<KeyIdentifier>,
    pub(crate) aia: Option<String>,
    pub(crate) crl: Option<String>,
    pub(crate) mft: Option<String>,
    pub(crate) repo: Option<String>,
    pub(crate) notify: Option<String>,
    pub(crate) ips: IpBlocks,
    pub(crate) asns: AsBlocks,
    pub(crate) expires: Time,
    pub(crate) purpose: Purpose,

    /// The base64-encoded subject public key info.
    ///
    /// Only present for BGPsec router certificates whose key gets handed
    /// on to routers.
    pub(crate) pubkey: Option<String>,

    /// The name of the trust anchor this certificate hangs off.
    ///
    /// Set by the validator once the certificate has been accepted into
    /// the authority tree.
    pub(crate) tal: Option<String>,

    /// Whether the validator has accepted the certificate.
    pub(crate) valid: bool,
}

/// # Data Access
///
impl Cert {
    pub fn ski(&self) -> KeyIdentifier {
        self.ski
    }

    pub fn aki(&self) -> Option<KeyIdentifier> {
        self.aki
    }

    pub fn aia(&self) -> Option<&str> {
        self.aia.as_deref()
    }

    pub fn crl(&self) -> Option<&str> {
        self.crl.as_deref()
    }

    pub fn mft(&self) -> Option<&str> {
        self.mft.as_deref()
    }

    pub fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    pub fn notify(&self) -> Option<&str> {
        self.notify.as_deref()
    }

    pub fn ip_resources(&self) -> &IpBlocks {
        &self.ips
    }

    pub fn as_resources(&self) -> &AsBlocks {
        &self.asns
    }

    pub fn expires(&self) -> Time {
        self.expires
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    pub fn pubkey(&self) -> Option<&str> {
        self.pubkey.as_deref()
    }

    pub fn tal(&self) -> Option<&str> {
        self.tal.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn set_tal(&mut self, tal: Option<String>) {
        self.tal = tal;
    }

    pub(crate) fn set_valid(&mut self) {
        self.valid = true;
    }
}

/// # Parsing
///
impl Cert {
    /// Parses a certificate issued within the repository.
    ///
    /// This is for CA and BGPsec router certificates that hang off some
    /// already known authority. Trust anchors go through
    /// [`parse_ta`][Self::parse_ta] instead. All diagnostics are logged
    /// under the given file name.
    pub fn parse(fname: &str, data: Bytes) -> Result<Self, Failed> {
        let cert = Self::decode_data(fname, data)?;
        cert.check(fname, false)?;
        Ok(cert)
    }

    /// Parses a trust anchor certificate.
    ///
    /// In addition to the usual checks, the certificate’s subject public
    /// key info must be byte-for-byte identical to the key provided by
    /// the trust anchor locator and the self-signature must verify under
    /// that key.
    pub fn parse_ta(
        fname: &str, data: Bytes, tal_key: &[u8]
    ) -> Result<Self, Failed> {
        let cert = Self::decode_data(fname, data)?;
        cert.check(fname, true)?;
        cert.authenticate_ta(fname, tal_key)?;
        Ok(cert)
    }

    fn decode_data(fname: &str, data: Bytes) -> Result<Self, Failed> {
        Self::decode(data).map_err(|_| {
            warn!("{}: RFC 6487: failed to parse certificate", fname);
            Failed
        })
    }

    pub fn decode<S: decode::Source>(source: S) -> Result<Self, S::Err> {
        Mode::Der.decode(source, Self::take_from)
    }

    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        cons.take_sequence(Self::from_constructed)
    }

    /// Parses the content of a Certificate sequence.
    fn from_constructed<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        let signed = SignedData::from_constructed(cons)?;

        let (expires, spki, ext) = signed.data().clone().decode(|cons| {
            cons.take_sequence(|cons| {
                // version [0] EXPLICIT Version DEFAULT v1.
                //  -- we need extensions so apparently, we want v3 which,
                //     confusingly, is 2.
                cons.take_constructed_if(Tag::CTX_0, |c| c.skip_u8_if(2))?;

                let _serial = Unsigned::take_from(cons)?;
                let _sig_alg = SignatureAlgorithm::take_from(cons)?;
                let _issuer = Name::take_from(cons)?;
                let expires = cons.take_sequence(|cons| {
                    let _not_before = Time::take_from(cons)?;
                    Time::take_from(cons)
                })?;
                let _subject = Name::take_from(cons)?;
                let spki = SubjectPublicKeyInfo::take_from(cons)?;
                cons.take_opt_value_if(
                    Tag::CTX_1, |c| BitString::from_content(c)
                )?;
                cons.take_opt_value_if(
                    Tag::CTX_2, |c| BitString::from_content(c)
                )?;
                let ext = cons.take_constructed_if(
                    Tag::CTX_3, Extensions::take_from
                )?;
                Ok((expires, spki, ext))
            })
        }).map_err(Into::into)?;

        Self::assemble(signed, expires, spki, ext)
            .map_err(Into::into)
    }

    /// Puts together the record from the parsed pieces.
    ///
    /// This resolves the certificate’s purpose and checks that key usage
    /// and key algorithm agree with it.
    fn assemble(
        signed: SignedData,
        expires: Time,
        spki: SubjectPublicKeyInfo,
        ext: Extensions,
    ) -> Result<Self, decode::Error> {
        let purpose = match ext.basic_ca {
            Some(true) => Purpose::Ca,
            Some(false) => {
                // RFC 6487: if basic constraints are present, the cA
                // boolean must be set.
                xerr!(return Err(decode::Error::Malformed))
            }
            None => {
                if ext.router_key == Some(true) {
                    Purpose::BgpsecRouter
                }
                else {
                    xerr!(return Err(decode::Error::Malformed))
                }
            }
        };
        match purpose {
            Purpose::Ca => {
                if !ext.key_usage_ca
                    || spki.algorithm() != PublicKeyAlgorithm::RsaEncryption
                {
                    xerr!(return Err(decode::Error::Malformed))
                }
            }
            Purpose::BgpsecRouter => {
                if ext.key_usage_ca
                    || spki.algorithm() != PublicKeyAlgorithm::EcPublicKey
                {
                    xerr!(return Err(decode::Error::Malformed))
                }
            }
        }
        let pubkey = match purpose {
            Purpose::BgpsecRouter => Some(base64::encode(spki.as_slice())),
            Purpose::Ca => None,
        };
        let (sia_present, repo, mft, notify) = match ext.sia {
            Some(sia) => (true, sia.repo, sia.mft, sia.notify),
            None => (false, None, None, None),
        };
        Ok(Cert {
            signed: Some(signed),
            spki: Some(spki),
            sia_present,
            ski: ext.subject_key_id,
            aki: ext.authority_key_id,
            aia: ext.authority_info_access,
            crl: ext.crl_uri,
            mft,
            repo,
            notify,
            ips: ext.ip_resources.unwrap_or_default(),
            asns: ext.as_resources.unwrap_or_default(),
            expires,
            purpose,
            pubkey,
            tal: None,
            valid: false,
        })
    }

    /// Checks the rules that depend on what the certificate is.
    fn check(&self, fname: &str, is_ta: bool) -> Result<(), Failed> {
        match self.purpose {
            Purpose::Ca => {
                if self.mft.is_none() {
                    warn!(
                        "{}: RFC 6487 section 4.8.8: missing rpkiManifest",
                        fname
                    );
                    return Err(Failed)
                }
                if self.repo.is_none() {
                    warn!(
                        "{}: RFC 6487 section 4.8.8: missing caRepository",
                        fname
                    );
                    return Err(Failed)
                }
                if self.ips.is_empty() && self.asns.is_empty() {
                    warn!(
                        "{}: RFC 6487 section 4.8.10: missing RFC 3779 \
                         resources",
                        fname
                    );
                    return Err(Failed)
                }
            }
            Purpose::BgpsecRouter => {
                if self.sia_present {
                    warn!(
                        "{}: RFC 8209 section 3.1.3.3: \
                         SIA not allowed in router certificate",
                        fname
                    );
                    return Err(Failed)
                }
                if !self.ips.is_empty() {
                    warn!(
                        "{}: RFC 8209 section 3.1.3.4: \
                         IP resources not allowed in router certificate",
                        fname
                    );
                    return Err(Failed)
                }
                if self.asns.is_empty() {
                    warn!(
                        "{}: RFC 8209 section 3.1.3.4: \
                         missing AS resources in router certificate",
                        fname
                    );
                    return Err(Failed)
                }
            }
        }
        self.check_uris(fname)?;
        if is_ta {
            if let Some(aki) = self.aki {
                if aki != self.ski {
                    warn!(
                        "{}: RFC 6487 section 4.8.3: authority key \
                         identifier does not match subject key identifier",
                        fname
                    );
                    return Err(Failed)
                }
            }
            if self.aia.is_some() {
                warn!(
                    "{}: RFC 8630: AIA not allowed in trust anchor",
                    fname
                );
                return Err(Failed)
            }
            if self.crl.is_some() {
                warn!(
                    "{}: RFC 8630: CRL distribution point not allowed in \
                     trust anchor",
                    fname
                );
                return Err(Failed)
            }
            if self.purpose != Purpose::Ca {
                warn!(
                    "{}: RFC 8630: trust anchor must be a CA certificate",
                    fname
                );
                return Err(Failed)
            }
        }
        else {
            match self.aki {
                None => {
                    warn!(
                        "{}: RFC 6487 section 4.8.3: missing authority \
                         key identifier",
                        fname
                    );
                    return Err(Failed)
                }
                Some(aki) if aki == self.ski => {
                    warn!(
                        "{}: RFC 6487 section 4.8.3: authority key \
                         identifier equals subject key identifier",
                        fname
                    );
                    return Err(Failed)
                }
                _ => { }
            }
            if self.aia.is_none() {
                warn!(
                    "{}: RFC 6487 section 4.8.7: missing authority \
                     info access",
                    fname
                );
                return Err(Failed)
            }
        }
        Ok(())
    }

    /// Checks the shape of all URIs carried by the certificate.
    fn check_uris(&self, fname: &str) -> Result<(), Failed> {
        if let Some(aia) = self.aia.as_deref() {
            if !valid_uri(aia.as_bytes(), "rsync://") {
                warn!(
                    "{}: RFC 6487 section 4.8.7: bad caIssuers URI",
                    fname
                );
                return Err(Failed)
            }
        }
        if let Some(crl) = self.crl.as_deref() {
            if !valid_uri(crl.as_bytes(), "rsync://") {
                warn!(
                    "{}: RFC 6487 section 4.8.6: bad CRL distribution \
                     point URI",
                    fname
                );
                return Err(Failed)
            }
        }
        if let Some(repo) = self.repo.as_deref() {
            if !valid_uri(repo.as_bytes(), "rsync://") {
                warn!(
                    "{}: RFC 6487 section 4.8.8: bad caRepository URI",
                    fname
                );
                return Err(Failed)
            }
        }
        if let Some(mft) = self.mft.as_deref() {
            if !valid_uri(mft.as_bytes(), "rsync://")
                || mft.len() < 4
                || !mft.as_bytes()[mft.len() - 4..]
                    .eq_ignore_ascii_case(b".mft")
            {
                warn!(
                    "{}: RFC 6487 section 4.8.8: bad rpkiManifest URI",
                    fname
                );
                return Err(Failed)
            }
        }
        if let Some(notify) = self.notify.as_deref() {
            if !valid_uri(notify.as_bytes(), "https://") {
                warn!(
                    "{}: RFC 8182: bad rpkiNotify URI",
                    fname
                );
                return Err(Failed)
            }
        }
        if let (Some(repo), Some(mft))
            = (self.repo.as_deref(), self.mft.as_deref())
        {
            if !mft.starts_with(repo) {
                warn!(
                    "{}: RFC 6487 section 4.8.8: rpkiManifest not within \
                     caRepository",
                    fname
                );
                return Err(Failed)
            }
        }
        Ok(())
    }

    /// Authenticates a trust anchor against the key from its TAL.
    fn authenticate_ta(
        &self, fname: &str, tal_key: &[u8]
    ) -> Result<(), Failed> {
        let (signed, spki) = match (self.signed.as_ref(), self.spki.as_ref()) {
            (Some(signed), Some(spki)) => (signed, spki),
            _ => return Err(Failed)
        };
        if spki.as_slice() != tal_key {
            warn!(
                "{}: RFC 8630: certificate key differs from TAL key",
                fname
            );
            return Err(Failed)
        }
        let bits = spki.key_bits().map_err(|_| {
            warn!("{}: RFC 7935: invalid subject public key", fname);
            Failed
        })?;
        signed.verify_signature(&bits).map_err(|_| {
            warn!("{}: RFC 8630: bad trust anchor self-signature", fname);
            Failed
        })
    }
}

/// # Serialization
///
impl Cert {
    /// The version of the record format on the inter-process stream.
    const VERSION: u8 = 1;

    /// The largest number of resource entries a reader accepts.
    const MAX_RESOURCE_ENTRIES: u32 = 65536;

    /// Writes the record to the inter-process stream.
    pub fn write(
        &self, writer: &mut impl io::Write
    ) -> Result<(), io::Error> {
        Self::VERSION.compose(writer)?;
        (self.valid as u8).compose(writer)?;
        self.expires.timestamp().compose(writer)?;
        self.purpose.code().compose(writer)?;

        u32::try_from(self.ips.len())
            .map_err(|_| ParseError::format("too many IP entries"))?
            .compose(writer)?;
        for block in self.ips.iter() {
            block.write(writer)?;
        }
        u32::try_from(self.asns.len())
            .map_err(|_| ParseError::format("too many AS entries"))?
            .compose(writer)?;
        for block in self.asns.iter() {
            block.write(writer)?;
        }

        self.mft.compose(writer)?;
        self.notify.compose(writer)?;
        self.repo.compose(writer)?;
        self.crl.compose(writer)?;
        self.aia.compose(writer)?;
        self.aki.map(|id| id.to_string()).compose(writer)?;
        self.ski.to_string().as_str().compose(writer)?;
        self.tal.compose(writer)?;
        self.pubkey.compose(writer)?;
        Ok(())
    }

    /// Reads a record from the inter-process stream.
    ///
    /// The stream comes from the untrusted parser process. Counts and
    /// lengths are bounded before anything is allocated and the record’s
    /// invariants are re-established entry by entry.
    pub fn read(reader: &mut impl io::Read) -> Result<Self, ParseError> {
        if u8::parse(reader)? != Self::VERSION {
            return Err(ParseError::format("unexpected record version"))
        }
        let valid = match u8::parse(reader)? {
            0 => false,
            1 => true,
            _ => return Err(ParseError::format("invalid validity marker"))
        };
        let expires = Time::from_timestamp(i64::parse(reader)?)
            .map_err(|_| ParseError::format("invalid expiry time"))?;
        let purpose = Purpose::from_code(u8::parse(reader)?)
            .ok_or_else(|| {
                ParseError::format("invalid certificate purpose")
            })?;

        let ipsz = u32::parse(reader)?;
        if ipsz > Self::MAX_RESOURCE_ENTRIES {
            return Err(ParseError::format("too many IP entries"))
        }
        let mut ips = IpBlocks::empty();
        for _ in 0..ipsz {
            ips.push(IpBlock::read(reader)?).map_err(|_| {
                ParseError::format("overlapping IP entries")
            })?;
        }
        let asz = u32::parse(reader)?;
        if asz > Self::MAX_RESOURCE_ENTRIES {
            return Err(ParseError::format("too many AS entries"))
        }
        let mut asns = AsBlocks::empty();
        for _ in 0..asz {
            asns.push(AsBlock::read(reader)?).map_err(|_| {
                ParseError::format("overlapping AS entries")
            })?;
        }

        let mft = Option::<String>::parse(reader)?;
        let notify = Option::<String>::parse(reader)?;
        let repo = Option::<String>::parse(reader)?;
        let crl = Option::<String>::parse(reader)?;
        let aia = Option::<String>::parse(reader)?;
        let aki = match Option::<String>::parse(reader)? {
            Some(text) => Some(text.parse::<KeyIdentifier>().map_err(|_| {
                ParseError::format("invalid authority key identifier")
            })?),
            None => None
        };
        let ski = match Option::<String>::parse(reader)? {
            Some(text) => text.parse::<KeyIdentifier>().map_err(|_| {
                ParseError::format("invalid subject key identifier")
            })?,
            None => {
                return Err(ParseError::format(
                    "missing subject key identifier"
                ))
            }
        };
        let tal = Option::<String>::parse(reader)?;
        let pubkey = Option::<String>::parse(reader)?;

        if purpose != Purpose::BgpsecRouter && mft.is_none() {
            return Err(ParseError::format("missing manifest URI"))
        }
        if (purpose == Purpose::BgpsecRouter) != pubkey.is_some() {
            return Err(ParseError::format("stray or missing public key"))
        }

        Ok(Cert {
            signed: None,
            spki: None,
            sia_present: mft.is_some() || repo.is_some()
                || notify.is_some(),
            ski, aki, aia, crl, mft, repo, notify,
            ips, asns, expires, purpose, pubkey, tal, valid,
        })
    }
}


//--- PartialEq and Eq

impl PartialEq for Cert {
    /// Compares everything that travels on the inter-process stream.
    fn eq(&self, other: &Self) -> bool {
        self.ski == other.ski
            && self.aki == other.aki
            && self.aia == other.aia
            && self.crl == other.crl
            && self.mft == other.mft
            && self.repo == other.repo
            && self.notify == other.notify
            && self.ips == other.ips
            && self.asns == other.asns
            && self.expires == other.expires
            && self.purpose == other.purpose
            && self.pubkey == other.pubkey
            && self.tal == other.tal
            && self.valid == other.valid
    }
}

impl Eq for Cert { }


//------------ Extensions ----------------------------------------------------

/// The parsed state of the certificate extensions.
struct Extensions {
    /// Basic Constraints.
    ///
    /// The field indicates whether the extension is present and, if so,
    /// whether the "cA" boolean is set. See 4.8.1 of RFC 6487.
    basic_ca: Option<bool>,

    /// Subject Key Identifier.
    subject_key_id: KeyIdentifier,

    /// Authority Key Identifier.
    authority_key_id: Option<KeyIdentifier>,

    /// Key Usage.
    key_usage_ca: bool,

    /// Extended Key Usage.
    ///
    /// If the extension is present, the field states whether the BGPsec
    /// router purpose was among the listed purposes.
    router_key: Option<bool>,

    /// The URI from the CRL Distribution Points extension.
    crl_uri: Option<String>,

    /// The caIssuers URI from the Authority Information Access extension.
    authority_info_access: Option<String>,

    /// Subject Information Access.
    sia: Option<Sia>,

    /// IP Resources.
    ip_resources: Option<IpBlocks>,

    /// AS Resources.
    as_resources: Option<AsBlocks>,
}

impl Extensions {
    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let mut basic_ca = None;
            let mut subject_key_id = None;
            let mut authority_key_id = None;
            let mut key_usage_ca = None;
            let mut router_key = None;
            let mut crl_uri = None;
            let mut authority_info_access = None;
            let mut sia = None;
            let mut ip_resources = None;
            let mut as_resources = None;
            while let Some(()) = cons.take_opt_sequence(|cons| {
                let id = Oid::take_from(cons)?;
                cons.take_opt_bool()?;
                let value = OctetString::take_from(cons)?;
                Mode::Der.decode(value.to_source(), |cons| {
                    if id == oid::CE_BASIC_CONSTRAINTS {
                        Self::take_basic_ca(cons, &mut basic_ca)
                    }
                    else if id == oid::CE_SUBJECT_KEY_IDENTIFIER {
                        Self::take_subject_key_identifier(
                            cons, &mut subject_key_id
                        )
                    }
                    else if id == oid::CE_AUTHORITY_KEY_IDENTIFIER {
                        Self::take_authority_key_identifier(
                            cons, &mut authority_key_id
                        )
                    }
                    else if id == oid::CE_KEY_USAGE {
                        Self::take_key_usage(cons, &mut key_usage_ca)
                    }
                    else if id == oid::CE_EXTENDED_KEY_USAGE {
                        Self::take_extended_key_usage(cons, &mut router_key)
                    }
                    else if id == oid::CE_CRL_DISTRIBUTION_POINTS {
                        Self::take_crl_distribution_points(
                            cons, &mut crl_uri
                        )
                    }
                    else if id == oid::PE_AUTHORITY_INFO_ACCESS {
                        Self::take_authority_info_access(
                            cons, &mut authority_info_access
                        )
                    }
                    else if id == oid::PE_SUBJECT_INFO_ACCESS {
                        Self::take_subject_info_access(cons, &mut sia)
                    }
                    else if id == oid::PE_IP_ADDR_BLOCK {
                        Self::take_ip_resources(cons, &mut ip_resources)
                    }
                    else if id == oid::PE_AUTONOMOUS_SYS_IDS {
                        Self::take_as_resources(cons, &mut as_resources)
                    }
                    else {
                        // RFC 5280 says we can ignore extensions we
                        // don’t know of. RFC 6487 agrees. So let’s do
                        // that.
                        cons.skip_all()
                    }
                })?;
                Ok(())
            })? { }
            Ok(Extensions {
                basic_ca,
                subject_key_id:
                    subject_key_id.ok_or(decode::Error::Malformed)?,
                authority_key_id,
                key_usage_ca: key_usage_ca.ok_or(decode::Error::Malformed)?,
                router_key,
                crl_uri,
                authority_info_access,
                sia,
                ip_resources,
                as_resources,
            })
        })
    }

    /// Parses the Basic Constraints extension.
    ///
    /// ```text
    /// BasicConstraints ::= SEQUENCE {
    ///     cA                      BOOLEAN DEFAULT FALSE,
    ///     pathLenConstraint       INTEGER (0..MAX) OPTIONAL }
    /// ```
    ///
    /// The pathLenConstraint field must not be present.
    fn take_basic_ca<S: decode::Source>(
        cons: &mut decode::Constructed<S>,
        basic_ca: &mut Option<bool>,
    ) -> Result<(), S::Err> {
        update_once(basic_ca, || {
            match cons.take_sequence(|cons| cons.take_opt_bool())? {
                Some(res) => Ok(res),
                None => Ok(false)
            }
        })
    }

    /// Parses the Subject Key Identifier extension.
    ///
    /// ```text
    /// SubjectKeyIdentifier ::= KeyIdentifier
    /// KeyIdentifier        ::= OCTET STRING
    /// ```
    ///
    /// The extension must be present and contain the 160 bit SHA-1 hash
    /// of the value of the DER-encoded bit string of the subject public
    /// key.
    fn take_subject_key_identifier<S: decode::Source>(
        cons: &mut decode::Constructed<S>,
        subject_key_id: &mut Option<KeyIdentifier>,
    ) -> Result<(), S::Err> {
        update_once(subject_key_id, || KeyIdentifier::take_from(cons))
    }

    /// Parses the Authority Key Identifier extension.
    ///
    /// ```text
    /// AuthorityKeyIdentifier ::= SEQUENCE {
    ///   keyIdentifier             [0] KeyIdentifier           OPTIONAL,
    ///   authorityCertIssuer       [1] GeneralNames            OPTIONAL,
    ///   authorityCertSerialNumber [2] CertificateSerialNumber OPTIONAL }
    /// ```
    ///
    /// Only keyIdentifier may be present.
    fn take_authority_key_identifier<S: decode::Source>(
        cons: &mut decode::Constructed<S>,
        authority_key_id: &mut Option<KeyIdentifier>,
    ) -> Result<(), S::Err> {
        update_once(authority_key_id, || {
            cons.take_sequence(|cons| {
                cons.take_primitive_if(Tag::CTX_0, |prim| {
                    let bytes = prim.take_all()?;
                    match KeyIdentifier::from_slice(bytes.as_ref()) {
                        Some(res) => Ok(res),
                        None => {
                            xerr!(Err(decode::Error::Malformed.into()))
                        }
                    }
                })
            })
        })
    }

    /// Parses the Key Usage extension.
    ///
    /// In CA certificates, keyCertSign and cRLSign must be set, in
    /// end-entity certificates digitalSignature must be set. The field
    /// therefore collapses into whether the key is a certification key.
    fn take_key_usage<S: decode::Source>(
        cons: &mut decode::Constructed<S>,
        key_usage_ca: &mut Option<bool>,
    ) -> Result<(), S::Err> {
        update_once(key_usage_ca, || {
            let bits = BitString::take_from(cons)?;
            if bits.bit(5) && bits.bit(6) {
                Ok(true)
            }
            else if bits.bit(0) {
                Ok(false)
            }
            else {
                xerr!(Err(decode::Error::Malformed.into()))
            }
        })
    }

    /// Parses the Extended Key Usage extension.
    ///
    /// ```text
    /// ExtKeyUsageSyntax ::= SEQUENCE SIZE (1..MAX) OF KeyPurposeId
    /// KeyPurposeId ::= OBJECT IDENTIFIER
    /// ```
    ///
    /// We only care whether id-kp-bgpsec-router is among the purposes.
    fn take_extended_key_usage<S: decode::Source>(
        cons: &mut decode::Constructed<S>,
        router_key: &mut Option<bool>,
    ) -> Result<(), S::Err> {
        update_once(router_key, || {
            cons.take_sequence(|cons| {
                let mut router = false;
                let mut any = false;
                while let Some(purpose) = cons.take_opt_primitive_if(
                    Tag::OID, |prim| prim.take_all()
                )? {
                    any = true;
                    if Oid(purpose) == oid::KP_BGPSEC_ROUTER {
                        router = true;
                    }
                }
                if !any {
                    xerr!(return Err(decode::Error::Malformed.into()))
                }
                Ok(router)
            })
        })
    }

    /// Parses the CRL Distribution Points extension.
    ///
    /// ```text
    /// CRLDistributionPoints ::= SEQUENCE SIZE (1..MAX) OF
    ///                           DistributionPoint
    ///
    /// DistributionPoint ::= SEQUENCE {
    ///     distributionPoint       [0]     DistributionPointName OPTIONAL,
    ///     reasons                 [1]     ReasonFlags OPTIONAL,
    ///     cRLIssuer               [2]     GeneralNames OPTIONAL }
    ///
    /// DistributionPointName ::= CHOICE {
    ///     fullName                [0]     GeneralNames,
    ///     nameRelativeToCRLIssuer [1]     RelativeDistinguishedName }
    /// ```
    ///
    /// It must contain exactly one Distribution Point. Of it, only the
    /// distributionPoint field must be present and it must contain the
    /// fullName choice which must be a uniformResourceIdentifier.
    fn take_crl_distribution_points<S: decode::Source>(
        cons: &mut decode::Constructed<S>,
        crl_uri: &mut Option<String>,
    ) -> Result<(), S::Err> {
        update_once(crl_uri, || {
            cons.take_sequence(|cons| {
                cons.take_sequence(|cons| {
                    cons.take_constructed_if(Tag::CTX_0, |cons| {
                        cons.take_constructed_if(Tag::CTX_0, |cons| {
                            let uri = take_uri(cons)?;
                            while cons.take_opt_primitive_if(
                                Tag::CTX_6, |prim| prim.skip_all()
                            )?.is_some() { }
                            Ok(uri)
                        })
                    })
                })
            })
        })
    }

    /// Parses the Authority Information Access extension.
    ///
    /// ```text
    /// AuthorityInfoAccessSyntax  ::=
    ///         SEQUENCE SIZE (1..MAX) OF AccessDescription
    ///
    /// AccessDescription  ::=  SEQUENCE {
    ///         accessMethod          OBJECT IDENTIFIER,
    ///         accessLocation        GeneralName  }
    /// ```
    ///
    /// Must contain exactly one entry with accessMethod id-ad-caIssuers
    /// and a URI as the generalName.
    fn take_authority_info_access<S: decode::Source>(
        cons: &mut decode::Constructed<S>,
        authority_info_access: &mut Option<String>,
    ) -> Result<(), S::Err> {
        update_once(authority_info_access, || {
            cons.take_sequence(|cons| {
                cons.take_sequence(|cons| {
                    oid::AD_CA_ISSUERS.skip_if(cons)?;
                    take_uri(cons)
                })
            })
        })
    }

    /// Parses the Subject Information Access extension.
    ///
    /// ```text
    /// SubjectInfoAccessSyntax  ::=
    ///         SEQUENCE SIZE (1..MAX) OF AccessDescription
    /// ```
    ///
    /// The access methods we care about are id-ad-caRepository,
    /// id-ad-rpkiManifest, and id-ad-rpkiNotify, each of which may appear
    /// at most once. Other access methods are ignored.
    fn take_subject_info_access<S: decode::Source>(
        cons: &mut decode::Constructed<S>,
        sia: &mut Option<Sia>,
    ) -> Result<(), S::Err> {
        update_once(sia, || {
            let mut res = Sia::default();
            cons.take_sequence(|cons| {
                while let Some(()) = cons.take_opt_sequence(|cons| {
                    let id = Oid::take_from(cons)?;
                    if id == oid::AD_CA_REPOSITORY {
                        if res.repo.replace(take_uri(cons)?).is_some() {
                            xerr!(return Err(decode::Error::Malformed.into()))
                        }
                    }
                    else if id == oid::AD_RPKI_MANIFEST {
                        if res.mft.replace(take_uri(cons)?).is_some() {
                            xerr!(return Err(decode::Error::Malformed.into()))
                        }
                    }
                    else if id == oid::AD_RPKI_NOTIFY {
                        if res.notify.replace(take_uri(cons)?).is_some() {
                            xerr!(return Err(decode::Error::Malformed.into()))
                        }
                    }
                    else {
                        let _ = cons.capture_one()?;
                    }
                    Ok(())
                })? { }
                Ok(())
            })?;
            Ok(res)
        })
    }

    /// Parses the IP Resources extension.
    fn take_ip_resources<S: decode::Source>(
        cons: &mut decode::Constructed<S>,
        ip_resources: &mut Option<IpBlocks>,
    ) -> Result<(), S::Err> {
        update_once(ip_resources, || IpBlocks::take_from(cons))
    }

    /// Parses the AS Resources extension.
    fn take_as_resources<S: decode::Source>(
        cons: &mut decode::Constructed<S>,
        as_resources: &mut Option<AsBlocks>,
    ) -> Result<(), S::Err> {
        update_once(as_resources, || AsBlocks::take_from(cons))
    }
}


//------------ Sia -----------------------------------------------------------

/// The URIs we picked out of the SIA extension.
#[derive(Clone, Debug, Default)]
struct Sia {
    repo: Option<String>,
    mft: Option<String>,
    notify: Option<String>,
}


//------------ Helpers -------------------------------------------------------

/// Takes a GeneralName that must be a URI from a source.
///
/// ```text
/// GeneralName ::= CHOICE {
///    ...
///    uniformResourceIdentifier       [6]     IA5String,
///    ... }
/// ```
fn take_uri<S: decode::Source>(
    cons: &mut decode::Constructed<S>
) -> Result<String, S::Err> {
    cons.take_primitive_if(Tag::CTX_6, |prim| {
        let bytes = prim.take_all()?;
        if !bytes.is_ascii() {
            xerr!(return Err(decode::Error::Malformed.into()))
        }
        match String::from_utf8(bytes.to_vec()) {
            Ok(res) => Ok(res),
            Err(_) => xerr!(Err(decode::Error::Malformed.into()))
        }
    })
}


//------------ OIDs ----------------------------------------------------------

mod oid {
    use bcder::{ConstOid, Oid};

    pub const CE_SUBJECT_KEY_IDENTIFIER: ConstOid = Oid(&[85, 29, 14]);
    pub const CE_KEY_USAGE: ConstOid = Oid(&[85, 29, 15]);
    pub const CE_BASIC_CONSTRAINTS: ConstOid = Oid(&[85, 29, 19]);
    pub const CE_CRL_DISTRIBUTION_POINTS: ConstOid = Oid(&[85, 29, 31]);
    pub const CE_AUTHORITY_KEY_IDENTIFIER: ConstOid = Oid(&[85, 29, 35]);
    pub const CE_EXTENDED_KEY_USAGE: ConstOid = Oid(&[85, 29, 37]);
    pub const PE_AUTHORITY_INFO_ACCESS: ConstOid
        = Oid(&[43, 6, 1, 5, 5, 7, 1, 1]);
    pub const PE_IP_ADDR_BLOCK: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 1, 7]);
    pub const PE_AUTONOMOUS_SYS_IDS: ConstOid
        = Oid(&[43, 6, 1, 5, 5, 7, 1, 8]);
    pub const PE_SUBJECT_INFO_ACCESS: ConstOid
        = Oid(&[43, 6, 1, 5, 5, 7, 1, 11]);
    pub const AD_CA_ISSUERS: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 48, 2]);
    pub const AD_CA_REPOSITORY: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 48, 5]);
    pub const AD_RPKI_MANIFEST: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 48, 10]);
    pub const AD_RPKI_NOTIFY: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 48, 13]);
    pub const KP_BGPSEC_ROUTER: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 3, 30]);
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::asres::{AsBlock, AsId};
    use crate::ipres::{
        AddressFamily, IpBlock, IpPayload, Prefix,
    };
    use crate::ipres::test::der;

    fn ext(id: &[u8], critical: bool, value: Vec<u8>) -> Vec<u8> {
        let mut content = der(0x06, id);
        if critical {
            content.extend_from_slice(&der(0x01, &[0xFF]));
        }
        content.extend_from_slice(&der(0x04, &value));
        der(0x30, &content)
    }

    fn access_description(id: &[u8], uri: &[u8]) -> Vec<u8> {
        let mut content = der(0x06, id);
        content.extend_from_slice(&der(0x86, uri));
        der(0x30, &content)
    }

    fn rsa_spki() -> Vec<u8> {
        let mut alg = der(
            0x06, &[42, 134, 72, 134, 247, 13, 1, 1, 1]
        );
        alg.extend_from_slice(&der(0x05, b""));
        let mut content = der(0x30, &alg);
        content.extend_from_slice(&der(0x03, &[0, 0x30, 0x06, 0x02, 0x01,
            0x03, 0x02, 0x01, 0x05]));
        der(0x30, &content)
    }

    fn ec_spki() -> Vec<u8> {
        let mut alg = der(0x06, &[42, 134, 72, 206, 61, 2, 1]);
        alg.extend_from_slice(&der(0x06, &[42, 134, 72, 206, 61, 3, 1, 7]));
        let mut content = der(0x30, &alg);
        content.extend_from_slice(&der(0x03, &[0, 0x04, 0x11, 0x22]));
        der(0x30, &content)
    }

    fn utc(text: &[u8]) -> Vec<u8> {
        der(0x17, text)
    }

    /// Builds a complete certificate from an SPKI and extensions.
    fn cert_der(spki: Vec<u8>, exts: Vec<u8>) -> Vec<u8> {
        let mut sig_alg = der(
            0x06, &[42, 134, 72, 134, 247, 13, 1, 1, 11]
        );
        sig_alg.extend_from_slice(&der(0x05, b""));
        let sig_alg = der(0x30, &sig_alg);

        let mut tbs = der(0xA0, &der(0x02, &[2]));
        tbs.extend_from_slice(&der(0x02, &[1]));
        tbs.extend_from_slice(&sig_alg);
        tbs.extend_from_slice(&der(0x30, b""));
        let mut validity = utc(b"250101000000Z");
        validity.extend_from_slice(&utc(b"350101000000Z"));
        tbs.extend_from_slice(&der(0x30, &validity));
        tbs.extend_from_slice(&der(0x30, b""));
        tbs.extend_from_slice(&spki);
        tbs.extend_from_slice(&der(0xA3, &der(0x30, &exts)));
        let tbs = der(0x30, &tbs);

        let mut content = tbs;
        content.extend_from_slice(&sig_alg);
        content.extend_from_slice(&der(0x03, &[0, 1, 2, 3]));
        der(0x30, &content)
    }

    fn ca_exts() -> Vec<u8> {
        let mut exts = ext(
            oid::CE_BASIC_CONSTRAINTS.0, true,
            der(0x30, &der(0x01, &[0xFF]))
        );
        exts.extend_from_slice(&ext(
            oid::CE_SUBJECT_KEY_IDENTIFIER.0, false,
            der(0x04, &[0x11; 20])
        ));
        exts.extend_from_slice(&ext(
            oid::CE_AUTHORITY_KEY_IDENTIFIER.0, false,
            der(0x30, &der(0x80, &[0x22; 20]))
        ));
        exts.extend_from_slice(&ext(
            oid::CE_KEY_USAGE.0, true, der(0x03, &[1, 0x06])
        ));
        exts.extend_from_slice(&ext(
            oid::PE_AUTHORITY_INFO_ACCESS.0, false,
            der(0x30, &access_description(
                oid::AD_CA_ISSUERS.0, b"rsync://example.net/repo/parent.cer"
            ))
        ));
        exts.extend_from_slice(&ext(
            oid::CE_CRL_DISTRIBUTION_POINTS.0, false,
            der(0x30, &der(0x30, &der(0xA0, &der(0xA0, &der(
                0x86, b"rsync://example.net/repo/parent.crl"
            )))))
        ));
        let mut sia = access_description(
            oid::AD_CA_REPOSITORY.0, b"rsync://example.net/repo/ca/"
        );
        sia.extend_from_slice(&access_description(
            oid::AD_RPKI_MANIFEST.0, b"rsync://example.net/repo/ca/ca.mft"
        ));
        sia.extend_from_slice(&access_description(
            oid::AD_RPKI_NOTIFY.0, b"https://example.net/notify.xml"
        ));
        exts.extend_from_slice(&ext(
            oid::PE_SUBJECT_INFO_ACCESS.0, false, der(0x30, &sia)
        ));
        exts.extend_from_slice(&ext(
            oid::PE_IP_ADDR_BLOCK.0, true, {
                let mut fam = der(0x04, &[0, 1]);
                fam.extend_from_slice(&der(0x30, &der(0x03, &[0, 10])));
                der(0x30, &der(0x30, &fam))
            }
        ));
        exts.extend_from_slice(&ext(
            oid::PE_AUTONOMOUS_SYS_IDS.0, true,
            der(0x30, &der(0xA0, &der(
                0x30, &der(0x02, &[0, 0xFB, 0xF4])
            )))
        ));
        exts
    }

    #[test]
    fn parse_ca_cert() {
        let data = cert_der(rsa_spki(), ca_exts());
        let cert = Cert::parse("ca.cer", Bytes::from(data)).unwrap();
        assert_eq!(cert.purpose(), Purpose::Ca);
        assert_eq!(
            cert.ski().to_string(),
            "1111111111111111111111111111111111111111"
        );
        assert_eq!(
            cert.aki().unwrap().to_string(),
            "2222222222222222222222222222222222222222"
        );
        assert_eq!(
            cert.aia(), Some("rsync://example.net/repo/parent.cer")
        );
        assert_eq!(
            cert.crl(), Some("rsync://example.net/repo/parent.crl")
        );
        assert_eq!(cert.repo(), Some("rsync://example.net/repo/ca/"));
        assert_eq!(
            cert.mft(), Some("rsync://example.net/repo/ca/ca.mft")
        );
        assert_eq!(cert.notify(), Some("https://example.net/notify.xml"));
        assert_eq!(cert.ip_resources().len(), 1);
        assert_eq!(cert.as_resources().len(), 1);
        assert!(cert.pubkey().is_none());
        assert!(!cert.is_valid());
    }

    fn router_exts() -> Vec<u8> {
        let mut exts = ext(
            oid::CE_SUBJECT_KEY_IDENTIFIER.0, false,
            der(0x04, &[0x11; 20])
        );
        exts.extend_from_slice(&ext(
            oid::CE_AUTHORITY_KEY_IDENTIFIER.0, false,
            der(0x30, &der(0x80, &[0x22; 20]))
        ));
        exts.extend_from_slice(&ext(
            oid::CE_KEY_USAGE.0, true, der(0x03, &[7, 0x80])
        ));
        exts.extend_from_slice(&ext(
            oid::CE_EXTENDED_KEY_USAGE.0, false,
            der(0x30, &der(0x06, oid::KP_BGPSEC_ROUTER.0))
        ));
        exts.extend_from_slice(&ext(
            oid::PE_AUTHORITY_INFO_ACCESS.0, false,
            der(0x30, &access_description(
                oid::AD_CA_ISSUERS.0, b"rsync://example.net/repo/parent.cer"
            ))
        ));
        exts.extend_from_slice(&ext(
            oid::CE_CRL_DISTRIBUTION_POINTS.0, false,
            der(0x30, &der(0x30, &der(0xA0, &der(0xA0, &der(
                0x86, b"rsync://example.net/repo/parent.crl"
            )))))
        ));
        exts.extend_from_slice(&ext(
            oid::PE_AUTONOMOUS_SYS_IDS.0, true,
            der(0x30, &der(0xA0, &der(
                0x30, &der(0x02, &[0, 0xFB, 0xF4])
            )))
        ));
        exts
    }

    #[test]
    fn parse_router_cert() {
        let data = cert_der(ec_spki(), router_exts());
        let cert = Cert::parse("router.cer", Bytes::from(data)).unwrap();
        assert_eq!(cert.purpose(), Purpose::BgpsecRouter);
        assert!(cert.pubkey().is_some());
        assert!(cert.mft().is_none());
        assert_eq!(cert.as_resources().len(), 1);
    }

    #[test]
    fn reject_router_cert_with_sia() {
        let mut exts = router_exts();
        exts.extend_from_slice(&ext(
            oid::PE_SUBJECT_INFO_ACCESS.0, false,
            der(0x30, &access_description(
                oid::AD_RPKI_NOTIFY.0, b"https://example.net/notify.xml"
            ))
        ));
        let data = cert_der(ec_spki(), exts);
        assert!(Cert::parse("router.cer", Bytes::from(data)).is_err());
    }

    #[test]
    fn reject_duplicate_extension() {
        let mut exts = ca_exts();
        exts.extend_from_slice(&ext(
            oid::CE_SUBJECT_KEY_IDENTIFIER.0, false,
            der(0x04, &[0x33; 20])
        ));
        let data = cert_der(rsa_spki(), exts);
        assert!(Cert::decode(Bytes::from(data)).is_err());
    }

    #[test]
    fn reject_mismatched_key_algorithm() {
        // A CA certificate must carry an RSA key.
        let data = cert_der(ec_spki(), ca_exts());
        assert!(Cert::parse("bad.cer", Bytes::from(data)).is_err());
    }

    fn test_cert() -> Cert {
        let data = cert_der(rsa_spki(), ca_exts());
        let mut cert = Cert::decode(Bytes::from(data)).unwrap();
        cert.set_tal(Some("example".into()));
        cert.set_valid();
        cert
    }

    #[test]
    fn write_read_round_trip() {
        let cert = test_cert();
        let mut encoded = Vec::new();
        cert.write(&mut encoded).unwrap();
        let mut slice = encoded.as_slice();
        let decoded = Cert::read(&mut slice).unwrap();
        assert!(slice.is_empty());
        assert_eq!(cert, decoded);
    }

    #[test]
    fn write_read_rejects_overlap() {
        let mut cert = test_cert();
        cert.ips = IpBlocks::empty();
        cert.ips.push(IpBlock::new(
            AddressFamily::Ipv4,
            IpPayload::Prefix(Prefix::new(10u128 << 120, 8))
        )).unwrap();
        let mut encoded = Vec::new();
        cert.write(&mut encoded).unwrap();
        // The stream starts with version, validity, expiry, and purpose
        // followed by the IP entry count and the single 35 octet entry.
        // Duplicate that entry and fix up the count, creating a stream
        // with two overlapping entries.
        let mut tampered = encoded.clone();
        tampered[11..15].copy_from_slice(&2u32.to_be_bytes());
        let entry = encoded[15..50].to_vec();
        tampered.splice(50..50, entry);
        let mut slice = tampered.as_slice();
        assert!(Cert::read(&mut slice).is_err());
    }

    #[test]
    fn read_requires_manifest() {
        let mut cert = test_cert();
        cert.mft = None;
        cert.repo = None;
        let mut encoded = Vec::new();
        cert.write(&mut encoded).unwrap();
        let mut slice = encoded.as_slice();
        assert!(Cert::read(&mut slice).is_err());
    }

    #[test]
    fn reject_uncovered_chars_in_uris() {
        let mut cert = test_cert();
        cert.mft = Some("rsync://example.net/repo/ca/./ca.mft".into());
        assert!(cert.check("ca.cer", false).is_err());
    }

    #[test]
    fn as_entries_survive_round_trip() {
        let mut cert = test_cert();
        cert.asns = AsBlocks::empty();
        cert.asns.push(AsBlock::Id(AsId::new(64496).unwrap())).unwrap();
        let mut encoded = Vec::new();
        cert.write(&mut encoded).unwrap();
        let decoded = Cert::read(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded.as_resources(), &cert.asns);
    }
}
