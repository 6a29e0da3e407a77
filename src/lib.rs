//! The validation core of an RPKI relying party.
//!
//! The _Resource Public Key Infrastructure_ (RPKI) is an application of
//! PKI to Internet routing security. It allows the holders of IP address
//! prefixes to publish cryptographically signed statements about the
//! autonomous systems that may originate routes for them.
//!
//! This crate contains the two halves at the heart of a relying party:
//! a parser for X.509 resource certificates carrying RFC 3779 resource
//! extensions, meant to run in an untrusted worker process, and the
//! trusted validator that decides whether an object is covered by the
//! chain of authorities leading up to a trust anchor. The two sides talk
//! through the record serialization in [`cert`] over a plain byte pipe.
//!
//! Fetching of repository data, the CMS layer of signed objects, and the
//! production of router-facing output are the business of the
//! surrounding application.

pub mod asres;
pub mod binio;
pub mod brk;
pub mod cert;
pub mod error;
pub mod ipres;
pub mod roa;
pub mod validate;
pub mod x509;
