//! IP resources of RPKI certificates.
//!
//! The types herein are defined in RFC 3779 for use with certificates in
//! general. RFC 6487 specifies how to use them with RPKI certificates. In
//! particular, it prohibits the use of Subsequent AFI values for address
//! families, making them always 16 bit. Additionally, if the "inherit"
//! value is not used for an address family, the set of addresses must be
//! non-empty.
//!
//! Since all prefixes and ranges are really just consecutive sequences of
//! addresses, values of both families are kept as 128 bit integers with
//! the address bits in the upper end. A single comparison then covers
//! prefixes and ranges of either family alike.
//!
//! The RFC’s requirement that entries appear in ascending order is not
//! enforced. What is enforced, because the validator depends on it, is
//! that no two entries of one family overlap and that the "inherit" value
//! is not combined with address entries of the same family.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use bcder::{decode, xerr};
use bcder::{BitString, OctetString, Tag};
use crate::binio::{Compose, Parse, ParseError};
use crate::validate::Coverage;
use crate::x509::ValidationError;


//------------ AddressFamily -------------------------------------------------

/// The address family of an IP resource entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Takes a single address family from the beginning of a value.
    ///
    /// ```text
    /// addressFamily ::= OCTET STRING (SIZE (2..3))
    /// ```
    ///
    /// RFC 6487 limits the value to the two-octet forms for IPv4 and
    /// IPv6.
    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        let os = OctetString::take_from(cons)?;
        let mut octets = os.octets();
        let first = match octets.next() {
            Some(first) => first,
            None => xerr!(return Err(decode::Error::Malformed.into()))
        };
        let second = match octets.next() {
            Some(second) => second,
            None => xerr!(return Err(decode::Error::Malformed.into()))
        };
        if octets.next().is_some() {
            xerr!(return Err(decode::Error::Malformed.into()))
        }
        match (first, second) {
            (0, 1) => Ok(AddressFamily::Ipv4),
            (0, 2) => Ok(AddressFamily::Ipv6),
            _ => xerr!(Err(decode::Error::Malformed.into())),
        }
    }

    /// Returns the address length of the family in bits.
    pub fn length(self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }

    /// Returns the family’s value in the IANA address family registry.
    pub fn code(self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 1,
            AddressFamily::Ipv6 => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AddressFamily::Ipv4),
            2 => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }

    /// Converts upper-aligned address bits into a proper address.
    pub fn address(self, bits: u128) -> IpAddr {
        match self {
            AddressFamily::Ipv4 => {
                IpAddr::V4(Ipv4Addr::from((bits >> 96) as u32))
            }
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::from(bits)),
        }
    }
}


//------------ Prefix --------------------------------------------------------

/// An IP address prefix: an address and a prefix length.
///
/// The address bits are upper-aligned and the bits beyond the prefix
/// length are kept at zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Prefix {
    addr: u128,
    len: u8,
}

impl Prefix {
    /// Creates a prefix, zeroing out the host part of the address.
    pub fn new(addr: u128, len: u8) -> Self {
        assert!(len <= 128);
        Prefix { addr: addr & mask(len), len }
    }

    /// Parses the content of an IPAddress value.
    ///
    /// A prefix of `k` bits is encoded as a bit string with `k`
    /// significant bits, stripped of any trailing zeros.
    fn parse_content<S: decode::Source>(
        family: AddressFamily,
        content: &mut decode::Content<S>,
    ) -> Result<Self, S::Err> {
        let bs = BitString::from_content(content)?;
        let (addr, len) = bits_from_string(&bs, family)?;
        Ok(Prefix { addr, len })
    }

    pub fn addr(self) -> u128 {
        self.addr
    }

    pub fn len(self) -> u8 {
        self.len
    }

    /// The lowest address covered by the prefix.
    pub fn min(self) -> u128 {
        self.addr
    }

    /// The highest address covered by the prefix.
    pub fn max(self) -> u128 {
        if self.len == 128 {
            self.addr
        }
        else {
            self.addr | (!0u128 >> self.len)
        }
    }
}


//------------ AddressRange --------------------------------------------------

/// An inclusive range of IP addresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddressRange {
    min: u128,
    max: u128,
}

impl AddressRange {
    /// Parses the content of an IPAddressRange value.
    ///
    /// ```text
    /// IPAddressRange ::= SEQUENCE {
    ///     min    IPAddress,
    ///     max    IPAddress }
    /// ```
    ///
    /// The min bit string is padded with zeros up to the family’s address
    /// length, the max bit string with ones. A range whose minimum lies
    /// above its maximum is rejected.
    fn parse_content<S: decode::Source>(
        family: AddressFamily,
        content: &mut decode::Content<S>,
    ) -> Result<Self, S::Err> {
        let cons = content.as_constructed()?;
        let (min, _) = bits_from_string(
            &BitString::take_from(cons)?, family
        )?;
        let (max_bits, max_len) = bits_from_string(
            &BitString::take_from(cons)?, family
        )?;
        let max = if max_len == 128 {
            max_bits
        }
        else {
            max_bits | (!0u128 >> max_len)
        };
        if min > max {
            xerr!(return Err(decode::Error::Malformed.into()))
        }
        Ok(AddressRange { min, max })
    }

    pub fn min(self) -> u128 {
        self.min
    }

    pub fn max(self) -> u128 {
        self.max
    }
}


//------------ IpBlock -------------------------------------------------------

/// A single entry of a certificate’s IP resources.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IpBlock {
    family: AddressFamily,
    payload: IpPayload,
}

/// The actual resource carried by an entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IpPayload {
    /// An address prefix.
    Prefix(Prefix),

    /// An explicit inclusive address range.
    Range(AddressRange),

    /// The resources of this family are those of the issuer.
    Inherit,
}

impl IpBlock {
    pub fn new(family: AddressFamily, payload: IpPayload) -> Self {
        IpBlock { family, payload }
    }

    /// Parses an optional IPAddressOrRange value.
    ///
    /// ```text
    /// IPAddressOrRange ::= CHOICE {
    ///     addressPrefix    IPAddress,
    ///     addressRange     IPAddressRange }
    /// ```
    fn take_opt_from<S: decode::Source>(
        family: AddressFamily,
        cons: &mut decode::Constructed<S>,
    ) -> Result<Option<Self>, S::Err> {
        cons.take_opt_value(|tag, content| {
            if tag == Tag::BIT_STRING {
                Prefix::parse_content(family, content)
                    .map(|p| IpBlock::new(family, IpPayload::Prefix(p)))
            }
            else if tag == Tag::SEQUENCE {
                AddressRange::parse_content(family, content)
                    .map(|r| IpBlock::new(family, IpPayload::Range(r)))
            }
            else {
                xerr!(Err(decode::Error::Malformed.into()))
            }
        })
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn payload(&self) -> &IpPayload {
        &self.payload
    }

    pub fn is_inherit(&self) -> bool {
        matches!(self.payload, IpPayload::Inherit)
    }

    /// Returns the covered address interval unless the entry inherits.
    pub fn range(&self) -> Option<(u128, u128)> {
        match self.payload {
            IpPayload::Prefix(prefix) => Some((prefix.min(), prefix.max())),
            IpPayload::Range(range) => Some((range.min(), range.max())),
            IpPayload::Inherit => None,
        }
    }

    /// Writes the entry to the inter-process stream.
    pub fn write(
        &self, writer: &mut impl io::Write
    ) -> Result<(), io::Error> {
        self.family.code().compose(writer)?;
        match self.payload {
            IpPayload::Prefix(prefix) => {
                0u8.compose(writer)?;
                prefix.min().compose(writer)?;
                prefix.max().compose(writer)?;
                prefix.len().compose(writer)?;
            }
            IpPayload::Range(range) => {
                1u8.compose(writer)?;
                range.min().compose(writer)?;
                range.max().compose(writer)?;
            }
            IpPayload::Inherit => {
                2u8.compose(writer)?;
            }
        }
        Ok(())
    }

    /// Reads an entry from the inter-process stream.
    ///
    /// The stream comes from the untrusted parser process, so everything
    /// is re-checked: the family and entry type must be known, prefix
    /// bounds must match the prefix, and ranges must be properly ordered.
    pub fn read(reader: &mut impl io::Read) -> Result<Self, ParseError> {
        let family = AddressFamily::from_code(u8::parse(reader)?)
            .ok_or_else(|| ParseError::format("invalid address family"))?;
        match u8::parse(reader)? {
            0 => {
                let min = u128::parse(reader)?;
                let max = u128::parse(reader)?;
                let len = u8::parse(reader)?;
                if len > family.length() {
                    return Err(ParseError::format("invalid prefix length"))
                }
                let prefix = Prefix::new(min, len);
                if prefix.min() != min || prefix.max() != max {
                    return Err(ParseError::format("invalid prefix bounds"))
                }
                Ok(IpBlock::new(family, IpPayload::Prefix(prefix)))
            }
            1 => {
                let min = u128::parse(reader)?;
                let max = u128::parse(reader)?;
                if min > max {
                    return Err(ParseError::format("invalid address range"))
                }
                Ok(IpBlock::new(
                    family,
                    IpPayload::Range(AddressRange { min, max })
                ))
            }
            2 => Ok(IpBlock::new(family, IpPayload::Inherit)),
            _ => Err(ParseError::format("invalid IP entry type"))
        }
    }
}


//------------ IpBlocks ------------------------------------------------------

/// The IP resources of one certificate.
///
/// New entries are appended through [`push`][Self::push] which enforces
/// the invariants the validator relies upon.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IpBlocks(Vec<IpBlock>);

impl IpBlocks {
    pub fn empty() -> Self {
        IpBlocks(Vec::new())
    }

    /// Parses the content of the IP resources extension.
    ///
    /// ```text
    /// IPAddrBlocks ::= SEQUENCE OF IPAddressFamily
    ///
    /// IPAddressFamily ::= SEQUENCE {
    ///     addressFamily         OCTET STRING (SIZE (2..3)),
    ///     ipAddressChoice       IPAddressChoice }
    ///
    /// IPAddressChoice ::= CHOICE {
    ///     inherit               NULL,
    ///     addressesOrRanges     SEQUENCE OF IPAddressOrRange }
    /// ```
    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let mut blocks = IpBlocks::empty();
            while let Some(()) = cons.take_opt_sequence(|cons| {
                let family = AddressFamily::take_from(cons)?;
                cons.take_value(|tag, content| {
                    if tag == Tag::NULL {
                        content.to_null()?;
                        if blocks.push(
                            IpBlock::new(family, IpPayload::Inherit)
                        ).is_err() {
                            xerr!(return Err(decode::Error::Malformed.into()))
                        }
                        Ok(())
                    }
                    else if tag == Tag::SEQUENCE {
                        let cons = content.as_constructed()?;
                        let mut any = false;
                        while let Some(block) = IpBlock::take_opt_from(
                            family, cons
                        )? {
                            if blocks.push(block).is_err() {
                                xerr!(
                                    return Err(
                                        decode::Error::Malformed.into()
                                    )
                                )
                            }
                            any = true;
                        }
                        if !any {
                            // An empty set must use the inherit form.
                            xerr!(return Err(decode::Error::Malformed.into()))
                        }
                        Ok(())
                    }
                    else {
                        xerr!(Err(decode::Error::Malformed.into()))
                    }
                })?;
                Ok(())
            })? { }
            if blocks.is_empty() {
                xerr!(return Err(decode::Error::Malformed.into()))
            }
            Ok(blocks)
        })
    }

    /// Appends an entry, upholding the set’s invariants.
    ///
    /// An inherit entry may not be combined with any other entry of the
    /// same family, and no two address entries of one family may
    /// overlap.
    pub fn push(&mut self, block: IpBlock) -> Result<(), ValidationError> {
        for other in self.0.iter().filter(|o| o.family == block.family) {
            match (block.range(), other.range()) {
                (Some((min, max)), Some((omin, omax))) => {
                    if min <= omax && omin <= max {
                        return Err(ValidationError)
                    }
                }
                _ => return Err(ValidationError)
            }
        }
        self.0.push(block);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpBlock> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns whether any family uses the inherit form.
    pub fn any_inherit(&self) -> bool {
        self.0.iter().any(IpBlock::is_inherit)
    }

    /// Checks whether the set covers the given interval of a family.
    ///
    /// Returns [`Coverage::Indeterminate`] if the set has nothing
    /// authoritative to say about the family, i.e., it has no entries for
    /// it or only inherits. An issuer further up then has to decide.
    pub fn coverage(
        &self, family: AddressFamily, min: u128, max: u128
    ) -> Coverage {
        let mut authoritative = false;
        for block in self.0.iter().filter(|b| b.family == family) {
            if let Some((bmin, bmax)) = block.range() {
                authoritative = true;
                if bmin <= min && max <= bmax {
                    return Coverage::Covered
                }
            }
        }
        if authoritative {
            Coverage::Refused
        }
        else {
            Coverage::Indeterminate
        }
    }
}


//------------ Helpers -------------------------------------------------------

/// Returns the network mask for a prefix of the given bit length.
fn mask(len: u8) -> u128 {
    if len == 0 {
        0
    }
    else if len >= 128 {
        !0
    }
    else {
        !(!0u128 >> len)
    }
}

/// Converts a bit string into upper-aligned address bits.
///
/// Returns the bits with everything beyond the string’s length zeroed
/// out, plus the number of significant bits. Fails if the string is
/// longer than the family’s address length.
fn bits_from_string(
    bs: &BitString, family: AddressFamily
) -> Result<(u128, u8), decode::Error> {
    if bs.octet_len() > 16 {
        xerr!(return Err(decode::Error::Malformed))
    }
    if bs.octet_len() == 0 {
        return Ok((0, 0))
    }
    let len = (bs.octet_len() * 8) as u8 - bs.unused();
    if len > family.length() {
        xerr!(return Err(decode::Error::Malformed))
    }
    let mut addr: u128 = 0;
    for octet in bs.octets() {
        addr = (addr << 8) | (octet as u128)
    }
    addr <<= (16 - bs.octet_len()) * 8;
    Ok((addr & mask(len), len))
}


//============ Tests =========================================================

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use bcder::Mode;

    /// Encodes a DER value from a tag and its content.
    pub(crate) fn der(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut res = vec![tag];
        if content.len() < 128 {
            res.push(content.len() as u8);
        }
        else {
            assert!(content.len() < 0x10000);
            res.push(0x82);
            res.push((content.len() >> 8) as u8);
            res.push(content.len() as u8);
        }
        res.extend_from_slice(content);
        res
    }

    /// Encodes a sequence of IPAddressFamily elements.
    fn ip_blocks_der(families: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut content = Vec::new();
        for (afi, choice) in families {
            let mut fam = der(0x04, &[0, *afi]);
            fam.extend_from_slice(choice);
            content.extend_from_slice(&der(0x30, &fam));
        }
        der(0x30, &content)
    }

    fn decode_blocks(data: &[u8]) -> Result<IpBlocks, bcder::decode::Error> {
        Mode::Der.decode(data, IpBlocks::take_from)
    }

    fn v4(addr: [u8; 4]) -> u128 {
        u128::from(u32::from(Ipv4Addr::from(addr))) << 96
    }

    #[test]
    fn decode_prefixes_and_ranges() {
        // 10.0.0.0/8 and the range 192.0.2.0 to 192.0.3.255.
        let blocks = decode_blocks(&ip_blocks_der(&[(1, {
            let mut choice = Vec::new();
            choice.extend_from_slice(&der(0x03, &[0, 10]));
            // min: 23 significant bits, trailing zeros stripped;
            // max: 22 significant bits, trailing ones stripped.
            let mut range = der(0x03, &[1, 192, 0, 2]);
            range.extend_from_slice(&der(0x03, &[2, 192, 0, 0]));
            choice.extend_from_slice(&der(0x30, &range));
            der(0x30, &choice)
        })])).unwrap();
        let mut iter = blocks.iter();
        let prefix = iter.next().unwrap();
        assert_eq!(prefix.family(), AddressFamily::Ipv4);
        assert_eq!(
            prefix.range().unwrap(),
            (v4([10, 0, 0, 0]), v4([10, 255, 255, 255]))
        );
        let range = iter.next().unwrap();
        assert_eq!(
            range.range().unwrap(),
            (v4([192, 0, 2, 0]), v4([192, 0, 3, 255]))
        );
        assert!(iter.next().is_none());
    }

    #[test]
    fn decode_inherit() {
        let blocks = decode_blocks(
            &ip_blocks_der(&[(1, der(0x05, b"")), (2, der(0x05, b""))])
        ).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.any_inherit());
    }

    #[test]
    fn decode_rejects_overlap() {
        // 10.0.0.0/8 overlaps 10.64.0.0/10.
        assert!(decode_blocks(&ip_blocks_der(&[(1, {
            let mut choice = Vec::new();
            choice.extend_from_slice(&der(0x03, &[0, 10]));
            choice.extend_from_slice(&der(0x03, &[6, 10, 64]));
            der(0x30, &choice)
        })])).is_err());
    }

    #[test]
    fn decode_rejects_reversed_range() {
        // min 11.0.0.0 lies above max 10.255.255.255.
        assert!(decode_blocks(&ip_blocks_der(&[(1, {
            let mut range = der(0x03, &[0, 11]);
            range.extend_from_slice(&der(0x03, &[0, 10]));
            der(0x30, &der(0x30, &range))
        })])).is_err());
    }

    #[test]
    fn decode_rejects_empty_choice() {
        assert!(decode_blocks(&ip_blocks_der(&[(1, der(0x30, b""))]))
            .is_err());
        assert!(decode_blocks(&der(0x30, b"")).is_err());
    }

    #[test]
    fn decode_rejects_overlong_prefix() {
        // 33 significant bits for an IPv4 prefix.
        assert!(decode_blocks(&ip_blocks_der(&[(1, {
            der(0x30, &der(0x03, &[7, 10, 0, 0, 0, 128]))
        })])).is_err());
    }

    #[test]
    fn push_enforces_inherit_exclusivity() {
        let mut blocks = IpBlocks::empty();
        blocks.push(
            IpBlock::new(AddressFamily::Ipv4, IpPayload::Inherit)
        ).unwrap();
        assert!(blocks.push(IpBlock::new(
            AddressFamily::Ipv4,
            IpPayload::Prefix(Prefix::new(v4([10, 0, 0, 0]), 8))
        )).is_err());
        // A different family is unaffected.
        blocks.push(IpBlock::new(
            AddressFamily::Ipv6, IpPayload::Inherit
        )).unwrap();
    }

    #[test]
    fn coverage_three_values() {
        let mut blocks = IpBlocks::empty();
        blocks.push(IpBlock::new(
            AddressFamily::Ipv4,
            IpPayload::Prefix(Prefix::new(v4([10, 0, 0, 0]), 8))
        )).unwrap();
        blocks.push(IpBlock::new(
            AddressFamily::Ipv6, IpPayload::Inherit
        )).unwrap();
        assert_eq!(
            blocks.coverage(
                AddressFamily::Ipv4, v4([10, 1, 0, 0]), v4([10, 1, 255, 255])
            ),
            Coverage::Covered
        );
        assert_eq!(
            blocks.coverage(
                AddressFamily::Ipv4, v4([11, 0, 0, 0]), v4([11, 0, 0, 255])
            ),
            Coverage::Refused
        );
        // Only inherit for IPv6, so the issuer has to decide.
        assert_eq!(
            blocks.coverage(AddressFamily::Ipv6, 0, 42),
            Coverage::Indeterminate
        );
    }

    #[test]
    fn write_read_entries() {
        let entries = [
            IpBlock::new(
                AddressFamily::Ipv4,
                IpPayload::Prefix(Prefix::new(v4([10, 0, 0, 0]), 8))
            ),
            IpBlock::new(
                AddressFamily::Ipv6,
                IpPayload::Range(AddressRange {
                    min: 0x2000u128 << 112, max: !0
                })
            ),
            IpBlock::new(AddressFamily::Ipv4, IpPayload::Inherit),
        ];
        for entry in &entries {
            let mut encoded = Vec::new();
            entry.write(&mut encoded).unwrap();
            let mut slice = encoded.as_slice();
            assert_eq!(IpBlock::read(&mut slice).unwrap(), *entry);
            assert!(slice.is_empty());
        }
    }
}
