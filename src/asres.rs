//! AS number resources of RPKI certificates.
//!
//! The types herein are defined in RFC 3779 for use with certificates in
//! general. RFC 6487 specifies how to use them with RPKI certificates. In
//! particular, it prohibits the use of RDI values, and if the "inherit"
//! value is not used, the set of identifiers must be non-empty.
//!
//! AS number zero is reserved (RFC 7607) and rejected wherever it
//! appears. Ranges must hold at least two identifiers: a singular or
//! reversed range is rejected.

use std::{fmt, io};
use bcder::{decode, xerr};
use bcder::Tag;
use crate::binio::{Compose, Parse, ParseError};
use crate::validate::Coverage;
use crate::x509::ValidationError;


//------------ AsId ----------------------------------------------------------

/// A single autonomous system number.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AsId(u32);

impl AsId {
    /// Creates an identifier, rejecting the reserved AS 0.
    pub fn new(id: u32) -> Result<Self, ValidationError> {
        if id == 0 {
            Err(ValidationError)
        }
        else {
            Ok(AsId(id))
        }
    }

    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        let id = cons.take_u32()?;
        if id == 0 {
            xerr!(return Err(decode::Error::Malformed.into()))
        }
        Ok(AsId(id))
    }

    fn parse_content<S: decode::Source>(
        content: &mut decode::Content<S>
    ) -> Result<Self, S::Err> {
        let id = content.to_u32()?;
        if id == 0 {
            xerr!(return Err(decode::Error::Malformed.into()))
        }
        Ok(AsId(id))
    }

    pub fn into_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AsId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AS{}", self.0)
    }
}


//------------ AsRange -------------------------------------------------------

/// An inclusive range of autonomous system numbers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AsRange {
    min: AsId,
    max: AsId,
}

impl AsRange {
    /// Creates a range, rejecting singular and reversed ones.
    pub fn new(min: AsId, max: AsId) -> Result<Self, ValidationError> {
        if min >= max {
            Err(ValidationError)
        }
        else {
            Ok(AsRange { min, max })
        }
    }

    /// Parses the content of an ASRange value.
    ///
    /// ```text
    /// ASRange ::= SEQUENCE {
    ///     min    ASId,
    ///     max    ASId }
    /// ```
    ///
    /// A range that holds fewer than two identifiers is rejected.
    fn parse_content<S: decode::Source>(
        content: &mut decode::Content<S>
    ) -> Result<Self, S::Err> {
        let cons = content.as_constructed()?;
        let min = AsId::take_from(cons)?;
        let max = AsId::take_from(cons)?;
        if min >= max {
            xerr!(return Err(decode::Error::Malformed.into()))
        }
        Ok(AsRange { min, max })
    }

    pub fn min(self) -> AsId {
        self.min
    }

    pub fn max(self) -> AsId {
        self.max
    }
}


//------------ AsBlock -------------------------------------------------------

/// A single entry of a certificate’s AS resources.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AsBlock {
    /// A single AS number.
    Id(AsId),

    /// A range of AS numbers.
    Range(AsRange),

    /// The AS resources are those of the issuer.
    Inherit,
}

impl AsBlock {
    /// Parses an optional ASIdOrRange value.
    ///
    /// ```text
    /// ASIdOrRange ::= CHOICE {
    ///     id     ASId,
    ///     range  ASRange }
    /// ```
    fn take_opt_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Option<Self>, S::Err> {
        cons.take_opt_value(|tag, content| {
            if tag == Tag::INTEGER {
                AsId::parse_content(content).map(AsBlock::Id)
            }
            else if tag == Tag::SEQUENCE {
                AsRange::parse_content(content).map(AsBlock::Range)
            }
            else {
                xerr!(Err(decode::Error::Malformed.into()))
            }
        })
    }

    pub fn is_inherit(&self) -> bool {
        matches!(self, AsBlock::Inherit)
    }

    /// Returns the covered identifier interval unless the entry inherits.
    pub fn range(&self) -> Option<(u32, u32)> {
        match *self {
            AsBlock::Id(id) => Some((id.into_u32(), id.into_u32())),
            AsBlock::Range(range) => {
                Some((range.min().into_u32(), range.max().into_u32()))
            }
            AsBlock::Inherit => None,
        }
    }

    /// Writes the entry to the inter-process stream.
    pub fn write(
        &self, writer: &mut impl io::Write
    ) -> Result<(), io::Error> {
        match *self {
            AsBlock::Id(id) => {
                0u8.compose(writer)?;
                id.into_u32().compose(writer)?;
            }
            AsBlock::Range(range) => {
                1u8.compose(writer)?;
                range.min().into_u32().compose(writer)?;
                range.max().into_u32().compose(writer)?;
            }
            AsBlock::Inherit => {
                2u8.compose(writer)?;
            }
        }
        Ok(())
    }

    /// Reads an entry from the inter-process stream.
    ///
    /// The same rules apply as when parsing from DER: no AS 0, ranges
    /// hold at least two identifiers.
    pub fn read(reader: &mut impl io::Read) -> Result<Self, ParseError> {
        match u8::parse(reader)? {
            0 => {
                let id = AsId::new(u32::parse(reader)?).map_err(|_| {
                    ParseError::format("invalid AS number")
                })?;
                Ok(AsBlock::Id(id))
            }
            1 => {
                let min = AsId::new(u32::parse(reader)?).map_err(|_| {
                    ParseError::format("invalid AS number")
                })?;
                let max = AsId::new(u32::parse(reader)?).map_err(|_| {
                    ParseError::format("invalid AS number")
                })?;
                if min >= max {
                    return Err(ParseError::format("invalid AS range"))
                }
                Ok(AsBlock::Range(AsRange { min, max }))
            }
            2 => Ok(AsBlock::Inherit),
            _ => Err(ParseError::format("invalid AS entry type"))
        }
    }
}


//------------ AsBlocks ------------------------------------------------------

/// The AS resources of one certificate.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AsBlocks(Vec<AsBlock>);

impl AsBlocks {
    pub fn empty() -> Self {
        AsBlocks(Vec::new())
    }

    /// Parses the content of the AS resources extension.
    ///
    /// ```text
    /// ASIdentifiers ::= SEQUENCE {
    ///     asnum  [0] EXPLICIT ASIdentifierChoice OPTIONAL,
    ///     rdi    [1] EXPLICIT ASIdentifierChoice OPTIONAL }
    ///
    /// ASIdentifierChoice ::= CHOICE {
    ///     inherit        NULL,
    ///     asIdsOrRanges  SEQUENCE OF ASIdOrRange }
    /// ```
    ///
    /// RDI values carry no meaning for route origin validation and are
    /// skipped. Any other element is an error.
    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let mut blocks = AsBlocks::empty();
            let asnum = cons.take_opt_constructed_if(Tag::CTX_0, |cons| {
                cons.take_value(|tag, content| {
                    if tag == Tag::NULL {
                        content.to_null()?;
                        if blocks.push(AsBlock::Inherit).is_err() {
                            xerr!(return Err(decode::Error::Malformed.into()))
                        }
                        Ok(())
                    }
                    else if tag == Tag::SEQUENCE {
                        let cons = content.as_constructed()?;
                        let mut any = false;
                        while let Some(block)
                            = AsBlock::take_opt_from(cons)?
                        {
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
                })
            })?;
            let rdi = cons.take_opt_constructed_if(Tag::CTX_1, |cons| {
                cons.skip_all()
            })?;
            if asnum.is_none() && rdi.is_none() {
                xerr!(return Err(decode::Error::Malformed.into()))
            }
            Ok(blocks)
        })
    }

    /// Appends an entry, upholding the set’s invariants.
    ///
    /// An inherit entry may not be combined with any other entry, and no
    /// two entries may overlap.
    pub fn push(&mut self, block: AsBlock) -> Result<(), ValidationError> {
        for other in self.0.iter() {
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

    pub fn iter(&self) -> impl Iterator<Item = &AsBlock> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns whether the set uses the inherit form.
    pub fn any_inherit(&self) -> bool {
        self.0.iter().any(AsBlock::is_inherit)
    }

    /// Checks whether the set covers the given identifier interval.
    ///
    /// Returns [`Coverage::Indeterminate`] if the set has nothing
    /// authoritative to say, i.e., it is empty or inherits. An issuer
    /// further up then has to decide.
    pub fn coverage(&self, min: u32, max: u32) -> Coverage {
        let mut authoritative = false;
        for block in &self.0 {
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


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use bcder::Mode;
    use crate::ipres::test::der;

    /// Encodes an ASIdentifiers value with the given asnum choice.
    fn as_blocks_der(choice: &[u8]) -> Vec<u8> {
        der(0x30, &der(0xA0, choice))
    }

    fn decode_blocks(data: &[u8]) -> Result<AsBlocks, bcder::decode::Error> {
        Mode::Der.decode(data, AsBlocks::take_from)
    }

    fn as_int(id: u32) -> Vec<u8> {
        // Unsigned INTEGER contents, with a leading zero octet where the
        // top bit would otherwise be set.
        let bytes = id.to_be_bytes();
        let mut content: Vec<u8> = bytes.iter().cloned()
            .skip_while(|&ch| ch == 0).collect();
        if content.is_empty() {
            content.push(0);
        }
        if content[0] & 0x80 != 0 {
            content.insert(0, 0);
        }
        der(0x02, &content)
    }

    #[test]
    fn decode_ids_and_ranges() {
        let mut choice = as_int(64500);
        let mut range = as_int(64502);
        range.extend_from_slice(&as_int(64510));
        choice.extend_from_slice(&der(0x30, &range));
        let blocks = decode_blocks(&as_blocks_der(&der(0x30, &choice)))
            .unwrap();
        let mut iter = blocks.iter();
        assert_eq!(iter.next().unwrap().range(), Some((64500, 64500)));
        assert_eq!(iter.next().unwrap().range(), Some((64502, 64510)));
        assert!(iter.next().is_none());
    }

    #[test]
    fn decode_inherit() {
        let blocks = decode_blocks(&as_blocks_der(&der(0x05, b""))).unwrap();
        assert!(blocks.any_inherit());
    }

    #[test]
    fn decode_skips_rdi() {
        // asnum with one id plus an rdi element.
        let mut content = der(0xA0, &der(0x30, &as_int(64500)));
        content.extend_from_slice(&der(0xA1, &der(0x05, b"")));
        let blocks = decode_blocks(&der(0x30, &content)).unwrap();
        assert_eq!(blocks.len(), 1);
        // rdi alone leaves the set empty but is not an error.
        let blocks = decode_blocks(
            &der(0x30, &der(0xA1, &der(0x05, b"")))
        ).unwrap();
        assert!(blocks.is_empty());
        // An ASIdentifiers value without any element is one, though.
        assert!(decode_blocks(&der(0x30, b"")).is_err());
    }

    #[test]
    fn decode_rejects_as_zero() {
        assert!(
            decode_blocks(&as_blocks_der(&der(0x30, &as_int(0)))).is_err()
        );
    }

    #[test]
    fn decode_rejects_bad_ranges() {
        // Singular range.
        let mut range = as_int(64500);
        range.extend_from_slice(&as_int(64500));
        assert!(decode_blocks(
            &as_blocks_der(&der(0x30, &der(0x30, &range)))
        ).is_err());
        // Reversed range.
        let mut range = as_int(64510);
        range.extend_from_slice(&as_int(64500));
        assert!(decode_blocks(
            &as_blocks_der(&der(0x30, &der(0x30, &range)))
        ).is_err());
    }

    #[test]
    fn decode_rejects_overlap() {
        let mut choice = as_int(64505);
        let mut range = as_int(64500);
        range.extend_from_slice(&as_int(64510));
        choice.extend_from_slice(&der(0x30, &range));
        assert!(decode_blocks(
            &as_blocks_der(&der(0x30, &choice))
        ).is_err());
    }

    #[test]
    fn push_enforces_inherit_exclusivity() {
        let mut blocks = AsBlocks::empty();
        blocks.push(AsBlock::Id(AsId::new(64500).unwrap())).unwrap();
        assert!(blocks.push(AsBlock::Inherit).is_err());
    }

    #[test]
    fn coverage_three_values() {
        let mut blocks = AsBlocks::empty();
        blocks.push(AsBlock::Range(AsRange {
            min: AsId::new(64500).unwrap(),
            max: AsId::new(64510).unwrap(),
        })).unwrap();
        assert_eq!(blocks.coverage(64505, 64505), Coverage::Covered);
        assert_eq!(blocks.coverage(64505, 64511), Coverage::Refused);
        assert_eq!(AsBlocks::empty().coverage(1, 1), Coverage::Indeterminate);
        let mut inherit = AsBlocks::empty();
        inherit.push(AsBlock::Inherit).unwrap();
        assert_eq!(inherit.coverage(1, 1), Coverage::Indeterminate);
    }

    #[test]
    fn write_read_entries() {
        let entries = [
            AsBlock::Id(AsId::new(64500).unwrap()),
            AsBlock::Range(AsRange {
                min: AsId::new(64502).unwrap(),
                max: AsId::new(64510).unwrap(),
            }),
            AsBlock::Inherit,
        ];
        for entry in &entries {
            let mut encoded = Vec::new();
            entry.write(&mut encoded).unwrap();
            let mut slice = encoded.as_slice();
            assert_eq!(AsBlock::read(&mut slice).unwrap(), *entry);
            assert!(slice.is_empty());
        }
    }
}
