//! BGPsec router keys.
//!
//! Routers validate BGPsec path signatures against the keys certified by
//! router certificates. A single certificate may certify its key for
//! several AS numbers, so the certificate is fanned out into one
//! [`RouterKey`] per AS number. Keys are aggregated into an ordered set
//! keyed by AS number, subject key identifier, and the key itself; when
//! the same key is certified more than once, the certificate that is
//! valid the longest wins.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use log::warn;
use crate::asres::AsId;
use crate::cert::{Cert, Purpose};
use crate::x509::{KeyIdentifier, Time};


//------------ RouterKey -----------------------------------------------------

/// A single key a router may use to sign BGPsec path segments for an AS.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouterKey {
    asid: AsId,
    ski: KeyIdentifier,

    /// The base64-encoded subject public key info of the router key.
    pubkey: String,

    /// The name of the trust anchor the certifying certificate hangs off.
    tal: Option<String>,

    expires: Time,
}

impl RouterKey {
    pub fn asid(&self) -> AsId {
        self.asid
    }

    pub fn ski(&self) -> KeyIdentifier {
        self.ski
    }

    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    pub fn tal(&self) -> Option<&str> {
        self.tal.as_deref()
    }

    pub fn expires(&self) -> Time {
        self.expires
    }
}


//------------ RouterKeys ----------------------------------------------------

/// The aggregated set of router keys.
#[derive(Clone, Debug, Default)]
pub struct RouterKeys {
    keys: BTreeMap<(AsId, KeyIdentifier, String), KeyInfo>,
}

#[derive(Clone, Debug)]
struct KeyInfo {
    expires: Time,
    tal: Option<String>,
}

impl RouterKeys {
    /// The widest AS range a certificate may fan out into keys.
    ///
    /// A hostile certificate could cover most of the 32 bit AS number
    /// space; expanding that into individual keys must not be possible.
    const MAX_RANGE_EXPANSION: u32 = 65536;

    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one key per AS number certified by a router certificate.
    ///
    /// AS ranges wider than [`Self::MAX_RANGE_EXPANSION`] are skipped
    /// with a warning. If a key already exists for an AS number, the
    /// entry with the later expiry survives along with its trust anchor
    /// name.
    pub fn insert_cert(&mut self, fname: &str, cert: &Cert) {
        if cert.purpose() != Purpose::BgpsecRouter {
            return
        }
        let pubkey = match cert.pubkey() {
            Some(pubkey) => pubkey,
            None => return
        };
        for block in cert.as_resources().iter() {
            let (min, max) = match block.range() {
                Some(range) => range,
                None => continue
            };
            if max - min >= Self::MAX_RANGE_EXPANSION {
                warn!(
                    "{}: not expanding excessive AS range AS{}--AS{}",
                    fname, min, max
                );
                continue
            }
            for id in min..=max {
                let asid = match AsId::new(id) {
                    Ok(asid) => asid,
                    Err(_) => continue
                };
                self.insert(
                    asid, cert.ski(), pubkey,
                    cert.tal().map(Into::into), cert.expires()
                );
            }
        }
    }

    fn insert(
        &mut self,
        asid: AsId,
        ski: KeyIdentifier,
        pubkey: &str,
        tal: Option<String>,
        expires: Time,
    ) {
        match self.keys.entry((asid, ski, pubkey.into())) {
            Entry::Vacant(entry) => {
                entry.insert(KeyInfo { expires, tal });
            }
            Entry::Occupied(mut entry) => {
                if expires > entry.get().expires {
                    entry.insert(KeyInfo { expires, tal });
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterates over the keys in set order.
    pub fn iter(&self) -> impl Iterator<Item = RouterKey> + '_ {
        self.keys.iter().map(|((asid, ski, pubkey), info)| {
            RouterKey {
                asid: *asid,
                ski: *ski,
                pubkey: pubkey.clone(),
                tal: info.tal.clone(),
                expires: info.expires,
            }
        })
    }
}


//============ Tests =========================================================
