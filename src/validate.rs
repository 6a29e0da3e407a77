//! Validation of objects against the authority tree.
//!
//! The trusted side of the house. Certificates arriving from the parser
//! process are checked against the [`AuthTree`]: the issuer named by the
//! AKI must be known, and every resource the certificate claims must be
//! covered by the chain of issuers. Coverage follows the inheritance
//! rules of RFC 3779: an issuer whose resource set says nothing about a
//! resource kind, either because it is absent or because it inherits
//! itself, passes the question on to its own issuer. Only an issuer with
//! an actual resource set gives a definite answer; running out of
//! issuers without one counts as a refusal as well.
//!
//! The module also houses the small predicates the surrounding machinery
//! uses to keep untrusted input at bay: file name, file hash, and URI
//! checks.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use log::{error, warn};
use ring::digest;
use crate::cert::{Cert, Purpose};
use crate::error::Failed;
use crate::ipres::AddressFamily;
use crate::roa::Roa;
use crate::x509::KeyIdentifier;


/// The longest URI we are willing to look at.
const MAX_URI_LENGTH: usize = 2048;


//------------ Coverage ------------------------------------------------------

/// The answer an issuer’s resource set gives about one resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Coverage {
    /// The set contains the resource.
    Covered,

    /// The set speaks for this resource kind and does not contain it.
    Refused,

    /// The set has nothing to say; the next issuer up has to answer.
    Indeterminate,
}


//------------ Auth ----------------------------------------------------------

/// A certificate that has been accepted as an authority.
#[derive(Clone, Debug)]
pub struct Auth {
    cert: Arc<Cert>,

    /// The subject key identifier of the issuing authority.
    ///
    /// Resolved against the tree on demand. `None` for a trust anchor.
    parent: Option<KeyIdentifier>,
}

impl Auth {
    fn new(cert: Arc<Cert>) -> Self {
        let parent = match cert.aki() {
            Some(aki) if aki != cert.ski() => Some(aki),
            _ => None
        };
        Auth { cert, parent }
    }

    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    pub fn parent(&self) -> Option<KeyIdentifier> {
        self.parent
    }
}


//------------ AuthTree ------------------------------------------------------

/// All currently known authorities, keyed by subject key identifier.
///
/// The parent links of the entries form a forest whose roots are the
/// trust anchors. Entries are never removed during a validation run.
#[derive(Clone, Debug, Default)]
pub struct AuthTree {
    auths: BTreeMap<KeyIdentifier, Auth>,
}

impl AuthTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the authority with the given subject key identifier.
    pub fn find(&self, ski: &KeyIdentifier) -> Option<&Auth> {
        self.auths.get(ski)
    }

    /// Inserts a certificate accepted by one of the `valid_*` functions.
    ///
    /// The tree takes shared ownership of the certificate. A duplicate
    /// subject key identifier is refused; the `valid_*` functions have
    /// checked this already, so hitting it here is a caller error.
    pub fn insert(&mut self, cert: Arc<Cert>) -> Result<(), Failed> {
        let ski = cert.ski();
        if self.auths.contains_key(&ski) {
            error!("duplicate SKI {} in authority tree", ski);
            return Err(Failed)
        }
        self.auths.insert(ski, Auth::new(cert));
        Ok(())
    }

    /// Iterates over the authorities in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Auth> {
        self.auths.values()
    }

    pub fn len(&self) -> usize {
        self.auths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.auths.is_empty()
    }

    /// Returns the issuer of an authority, if it is in the tree.
    fn parent_of(&self, auth: &Auth) -> Option<&Auth> {
        auth.parent().and_then(|ski| self.find(&ski))
    }
}


//------------ Object validation ---------------------------------------------

/// Checks the key identifiers of a new object against the tree.
///
/// The subject key must not be taken yet and the authority key must name
/// a known authority, which is then returned.
pub fn valid_ski_aki<'a>(
    fname: &str,
    tree: &'a AuthTree,
    ski: KeyIdentifier,
    aki: KeyIdentifier,
) -> Option<&'a Auth> {
    if tree.find(&ski).is_some() {
        warn!("{}: RFC 6487: duplicate SKI {}", fname, ski);
        return None
    }
    match tree.find(&aki) {
        Some(auth) => Some(auth),
        None => {
            warn!("{}: RFC 6487: unknown AKI {}", fname, aki);
            None
        }
    }
}

/// Validates a trust anchor certificate against the tree.
///
/// A trust anchor must bring its own resources, so inheriting is out,
/// and its subject key must be new to the tree. On success the
/// certificate is stamped with the name of its trust anchor locator.
pub fn valid_ta(
    fname: &str, tree: &AuthTree, cert: &mut Cert, tal: &str
) -> bool {
    if cert.ip_resources().any_inherit()
        || cert.as_resources().any_inherit()
    {
        warn!(
            "{}: RFC 6487 section 4.8.10: trust anchor inheriting \
             resources",
            fname
        );
        return false
    }
    if tree.find(&cert.ski()).is_some() {
        warn!("{}: RFC 6487: duplicate SKI {}", fname, cert.ski());
        return false
    }
    cert.set_tal(Some(tal.into()));
    cert.set_valid();
    true
}

/// Validates a CA or router certificate against the tree.
///
/// The certificate’s issuer must be known and every resource entry must
/// be covered by the chain of issuers. On success the certificate is
/// stamped with its chain’s trust anchor name.
pub fn valid_cert(fname: &str, tree: &AuthTree, cert: &mut Cert) -> bool {
    let aki = match cert.aki() {
        Some(aki) => aki,
        None => {
            warn!(
                "{}: RFC 6487 section 4.8.3: missing authority key \
                 identifier",
                fname
            );
            return false
        }
    };
    let auth = match valid_ski_aki(fname, tree, cert.ski(), aki) {
        Some(auth) => auth,
        None => return false
    };
    for block in cert.as_resources().iter() {
        match block.range() {
            None => {
                // Inheriting is how CA certificates usually work, but a
                // router certificate must spell its AS resources out
                // (RFC 8209 section 3.1.3.4).
                if cert.purpose() == Purpose::BgpsecRouter {
                    warn!(
                        "{}: RFC 8209 section 3.1.3.4: router \
                         certificate inheriting AS resources",
                        fname
                    );
                    return false
                }
            }
            Some((min, max)) => {
                if !valid_as(fname, tree, auth, min, max) {
                    return false
                }
            }
        }
    }
    for block in cert.ip_resources().iter() {
        if let Some((min, max)) = block.range() {
            if !valid_ip(fname, tree, auth, block.family(), min, max) {
                return false
            }
        }
    }
    cert.set_tal(auth.cert().tal().map(Into::into));
    cert.set_valid();
    true
}

/// Validates a ROA against the tree.
///
/// Every prefix the ROA asserts must be covered by the chain of the
/// certificate that signed it. On success the ROA is stamped with its
/// chain’s trust anchor name.
pub fn valid_roa(fname: &str, tree: &AuthTree, roa: &mut Roa) -> bool {
    let auth = match valid_ski_aki(fname, tree, roa.ski(), roa.aki()) {
        Some(auth) => auth,
        None => return false
    };
    for prefix in roa.prefixes() {
        let (min, max) = prefix.range();
        if !valid_ip(fname, tree, auth, prefix.family(), min, max) {
            return false
        }
    }
    roa.set_tal(auth.cert().tal().map(Into::into));
    true
}

/// Walks the chain until somebody has an answer about an AS interval.
fn valid_as(
    fname: &str, tree: &AuthTree, auth: &Auth, min: u32, max: u32
) -> bool {
    let mut cur = Some(auth);
    while let Some(a) = cur {
        match a.cert().as_resources().coverage(min, max) {
            Coverage::Covered => return true,
            Coverage::Refused => break,
            Coverage::Indeterminate => cur = tree.parent_of(a),
        }
    }
    if min == max {
        warn!("{}: RFC 6487: uncovered AS{}", fname, min);
    }
    else {
        warn!("{}: RFC 6487: uncovered AS{}--AS{}", fname, min, max);
    }
    trace_chain(fname, tree, auth);
    false
}

/// Walks the chain until somebody has an answer about an address
/// interval.
fn valid_ip(
    fname: &str,
    tree: &AuthTree,
    auth: &Auth,
    family: AddressFamily,
    min: u128,
    max: u128,
) -> bool {
    let mut cur = Some(auth);
    while let Some(a) = cur {
        match a.cert().ip_resources().coverage(family, min, max) {
            Coverage::Covered => return true,
            Coverage::Refused => break,
            Coverage::Indeterminate => cur = tree.parent_of(a),
        }
    }
    warn!(
        "{}: RFC 6487: uncovered IP: {}--{}",
        fname, family.address(min), family.address(max)
    );
    trace_chain(fname, tree, auth);
    false
}

/// Names the issuers that were consulted about an uncovered resource.
fn trace_chain(fname: &str, tree: &AuthTree, auth: &Auth) {
    let mut cur = Some(auth);
    while let Some(a) = cur {
        match a.cert().mft() {
            Some(mft) => {
                warn!("{}: ...inheriting from: {}", fname, mft);
            }
            None => {
                warn!(
                    "{}: ...inheriting from: SKI {}", fname, a.cert().ski()
                );
            }
        }
        cur = tree.parent_of(a);
    }
}


//------------ Input validation ----------------------------------------------

/// Checks that a file name is one we would fetch.
///
/// Accepted are base names of at least five characters, built from
/// alphanumerics, dash, underscore, and a single dot before one of the
/// known object extensions.
pub fn valid_filename(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < 5 {
        return false
    }
    if !bytes.iter().all(|&ch| {
        ch.is_ascii_alphanumeric() || ch == b'.' || ch == b'-' || ch == b'_'
    }) {
        return false
    }
    if bytes.iter().filter(|&&ch| ch == b'.').count() != 1 {
        return false
    }
    let ext = &bytes[bytes.len() - 4..];
    [&b".cer"[..], b".crl", b".gbr", b".roa"].iter().any(|known| {
        ext.eq_ignore_ascii_case(known)
    })
}

/// Checks that a URI is plausible and uses the given protocol.
///
/// All characters must be ASCII alphanumerics or punctuation, the
/// protocol prefix is matched case-insensitively, and no path component
/// may start with a dot.
pub fn valid_uri(uri: &[u8], proto: &str) -> bool {
    if uri.len() > MAX_URI_LENGTH {
        return false
    }
    if !uri.iter().all(|ch| {
        ch.is_ascii_alphanumeric() || ch.is_ascii_punctuation()
    }) {
        return false
    }
    let proto = proto.as_bytes();
    if uri.len() < proto.len()
        || !uri[..proto.len()].eq_ignore_ascii_case(proto)
    {
        return false
    }
    !uri.windows(2).any(|window| window == b"/.")
}

/// Checks that a file has the expected SHA-256 digest.
///
/// A digest of the wrong size is a contract violation by the caller and
/// fatal. A file that cannot be read or hashes differently merely makes
/// the check fail.
pub fn valid_filehash(
    path: &Path, expected: &[u8]
) -> Result<bool, Failed> {
    if expected.len() != digest::SHA256_OUTPUT_LEN {
        error!(
            "{}: comparing against a digest of {} octets",
            path.display(), expected.len()
        );
        return Err(Failed)
    }
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return Ok(false)
    };
    let mut data = Vec::new();
    if file.read_to_end(&mut data).is_err() {
        return Ok(false)
    }
    Ok(digest::digest(&digest::SHA256, &data).as_ref() == expected)
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::asres::{AsBlock, AsBlocks, AsId};
    use crate::ipres::{
        AddressFamily, IpBlock, IpBlocks, IpPayload, Prefix,
    };
    use crate::roa::{Roa, RoaPrefix};
    use crate::x509::Time;

    fn key(ch: u8) -> KeyIdentifier {
        KeyIdentifier::from_slice(&[ch; 20]).unwrap()
    }

    fn v4(addr: [u8; 4]) -> u128 {
        u128::from(u32::from(std::net::Ipv4Addr::from(addr))) << 96
    }

    fn prefix_v4(addr: [u8; 4], len: u8) -> IpBlocks {
        let mut blocks = IpBlocks::empty();
        blocks.push(IpBlock::new(
            AddressFamily::Ipv4,
            IpPayload::Prefix(Prefix::new(v4(addr), len))
        )).unwrap();
        blocks
    }

    fn inherit_v4() -> IpBlocks {
        let mut blocks = IpBlocks::empty();
        blocks.push(
            IpBlock::new(AddressFamily::Ipv4, IpPayload::Inherit)
        ).unwrap();
        blocks
    }

    fn asns(id: u32) -> AsBlocks {
        let mut blocks = AsBlocks::empty();
        blocks.push(AsBlock::Id(AsId::new(id).unwrap())).unwrap();
        blocks
    }

    fn ca_cert(
        ski: u8, aki: Option<u8>, ips: IpBlocks, asns: AsBlocks
    ) -> Cert {
        Cert {
            signed: None,
            spki: None,
            sia_present: true,
            ski: key(ski),
            aki: aki.map(key),
            aia: aki.map(|_| {
                "rsync://example.net/repo/parent.cer".into()
            }),
            crl: aki.map(|_| {
                "rsync://example.net/repo/parent.crl".into()
            }),
            mft: Some(format!(
                "rsync://example.net/repo/{:02x}/ca.mft", ski
            )),
            repo: Some(format!("rsync://example.net/repo/{:02x}/", ski)),
            notify: None,
            ips,
            asns,
            expires: Time::from_timestamp(4102444800).unwrap(),
            purpose: Purpose::Ca,
            pubkey: None,
            tal: None,
            valid: false,
        }
    }

    fn tree_with_ta() -> AuthTree {
        let mut tree = AuthTree::new();
        let mut ta = ca_cert(
            1, None, prefix_v4([10, 0, 0, 0], 8), asns(64500)
        );
        assert!(valid_ta("ta.cer", &tree, &mut ta, "example"));
        tree.insert(Arc::new(ta)).unwrap();
        tree
    }

    #[test]
    fn ta_install_and_duplicate() {
        let tree = tree_with_ta();
        assert_eq!(tree.len(), 1);
        let auth = tree.find(&key(1)).unwrap();
        assert_eq!(auth.cert().tal(), Some("example"));
        assert!(auth.cert().is_valid());
        // A second trust anchor with the same SKI is refused.
        let mut dup = ca_cert(
            1, None, prefix_v4([10, 0, 0, 0], 8), asns(64500)
        );
        assert!(!valid_ta("ta2.cer", &tree, &mut dup, "other"));
    }

    #[test]
    fn ta_must_not_inherit() {
        let tree = AuthTree::new();
        let mut ta = ca_cert(1, None, inherit_v4(), asns(64500));
        assert!(!valid_ta("ta.cer", &tree, &mut ta, "example"));
    }

    #[test]
    fn covered_child() {
        let mut tree = tree_with_ta();
        let mut child = ca_cert(
            2, Some(1), prefix_v4([10, 1, 0, 0], 16), asns(64500)
        );
        assert!(valid_cert("child.cer", &tree, &mut child));
        assert_eq!(child.tal(), Some("example"));
        assert!(child.is_valid());
        tree.insert(Arc::new(child)).unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn uncovered_child() {
        let tree = tree_with_ta();
        let mut child = ca_cert(
            3, Some(1), prefix_v4([11, 0, 0, 0], 8), asns(64500)
        );
        assert!(!valid_cert("child.cer", &tree, &mut child));
        assert!(!child.is_valid());
    }

    #[test]
    fn unknown_parent() {
        let tree = tree_with_ta();
        let mut child = ca_cert(
            3, Some(9), prefix_v4([10, 1, 0, 0], 16), asns(64500)
        );
        assert!(!valid_cert("child.cer", &tree, &mut child));
    }

    #[test]
    fn inheriting_child() {
        let mut tree = tree_with_ta();
        let mut child = ca_cert(4, Some(1), inherit_v4(), asns(64500));
        assert!(valid_cert("child.cer", &tree, &mut child));
        tree.insert(Arc::new(child)).unwrap();

        // Coverage for a grandchild is decided at the nearest issuer
        // with an actual set, here the trust anchor.
        let mut grandchild = ca_cert(
            5, Some(4), prefix_v4([10, 2, 0, 0], 16), asns(64500)
        );
        assert!(valid_cert("grandchild.cer", &tree, &mut grandchild));

        // The trust anchor still refuses what it does not have.
        let mut outside = ca_cert(
            6, Some(4), prefix_v4([11, 0, 0, 0], 8), asns(64500)
        );
        assert!(!valid_cert("outside.cer", &tree, &mut outside));
    }

    #[test]
    fn roa_coverage() {
        let mut tree = tree_with_ta();
        let mut child = ca_cert(
            2, Some(1), prefix_v4([10, 1, 0, 0], 16), asns(64500)
        );
        assert!(valid_cert("child.cer", &tree, &mut child));
        tree.insert(Arc::new(child)).unwrap();

        let mut roa = Roa::new(
            key(0x51), key(2),
            Time::from_timestamp(4102444800).unwrap(),
            AsId::new(64500).unwrap(),
            vec![RoaPrefix::new(
                AddressFamily::Ipv4,
                Prefix::new(v4([10, 1, 0, 0]), 24),
                None,
            ).unwrap()],
        );
        assert!(valid_roa("roa.roa", &tree, &mut roa));
        assert_eq!(roa.tal(), Some("example"));

        let mut bad = Roa::new(
            key(0x52), key(2),
            Time::from_timestamp(4102444800).unwrap(),
            AsId::new(64500).unwrap(),
            vec![RoaPrefix::new(
                AddressFamily::Ipv4,
                Prefix::new(v4([11, 1, 0, 0]), 16),
                None,
            ).unwrap()],
        );
        assert!(!valid_roa("bad.roa", &tree, &mut bad));
        assert!(bad.tal().is_none());
    }

    #[test]
    fn filename_predicate() {
        assert!(valid_filename("a.cer"));
        assert!(valid_filename("A.CER"));
        assert!(!valid_filename(".cer"));
        assert!(!valid_filename("a.b.cer"));
        assert!(valid_filename("a-b_c.ROA"));
        assert!(!valid_filename("a.txt"));
        assert!(!valid_filename("a b.cer"));
    }

    #[test]
    fn uri_predicate() {
        assert!(valid_uri(b"rsync://x/y.mft", "rsync://"));
        assert!(!valid_uri(b"https://x/./y", "https://"));
        assert!(!valid_uri(b"http://x", "https://"));
        assert!(!valid_uri(b"rsync://x/\x07", "rsync://"));
        assert!(!valid_uri(&vec![b'a'; 4096], "rsync://"));
    }

    #[test]
    fn filehash_predicate() {
        let path = std::env::temp_dir().join(format!(
            "filehash-test-{}", std::process::id()
        ));
        std::fs::write(&path, b"test data").unwrap();
        let expected = digest::digest(&digest::SHA256, b"test data");
        assert_eq!(
            valid_filehash(&path, expected.as_ref()).unwrap(), true
        );
        let wrong = digest::digest(&digest::SHA256, b"other data");
        assert_eq!(
            valid_filehash(&path, wrong.as_ref()).unwrap(), false
        );
        assert!(valid_filehash(&path, b"short").is_err());
        std::fs::remove_file(&path).unwrap();
        assert_eq!(
            valid_filehash(&path, expected.as_ref()).unwrap(), false
        );
    }
}
