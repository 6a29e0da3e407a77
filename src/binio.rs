//! Simple binary data serialization.
//!
//! The traits [`Compose`] and [`Parse`] are implemented by types that know
//! how to serialize themselves onto the byte stream between the parser
//! process and the validator process. The module implements the traits for
//! all the primitive types we need. The stream has no framing of its own:
//! fields are written in a fixed order and read back in exactly the same
//! order.
//!
//! Data arriving on the stream is untrusted. Readers therefore bound every
//! allocation: length fields above [`MAX_DATA_LEN`] are rejected outright.

use std::{error, fmt, io, slice};
use std::convert::TryFrom;


/// The largest length-prefixed item a reader will allocate for.
///
/// Nothing legitimately carried on the stream comes close: the longest
/// items are URIs and base64 key data.
pub const MAX_DATA_LEN: u32 = 4096;


//------------ Compose + Parse -----------------------------------------------

pub trait Compose<W> {
    fn compose(&self, target: &mut W) -> Result<(), io::Error>;
}

pub trait Parse<R>
where Self: Sized {
    fn parse(source: &mut R) -> Result<Self, ParseError>;
}


//------------ u8 ------------------------------------------------------------

impl<W: io::Write> Compose<W> for u8 {
    fn compose(&self, target: &mut W) -> Result<(), io::Error> {
        target.write_all(slice::from_ref(self))
    }
}

impl<R: io::Read> Parse<R> for u8 {
    fn parse(source: &mut R) -> Result<Self, ParseError> {
        let mut res = 0u8;
        source.read_exact(slice::from_mut(&mut res))?;
        Ok(res)
    }
}


//------------ u32 -----------------------------------------------------------

impl<W: io::Write> Compose<W> for u32 {
    fn compose(&self, target: &mut W) -> Result<(), io::Error> {
        target.write_all(&self.to_be_bytes())
    }
}

impl<R: io::Read> Parse<R> for u32 {
    fn parse(source: &mut R) -> Result<Self, ParseError> {
        let mut res = 0u32.to_ne_bytes();
        source.read_exact(&mut res)?;
        Ok(u32::from_be_bytes(res))
    }
}


//------------ i64 -----------------------------------------------------------

impl<W: io::Write> Compose<W> for i64 {
    fn compose(&self, target: &mut W) -> Result<(), io::Error> {
        target.write_all(&self.to_be_bytes())
    }
}

impl<R: io::Read> Parse<R> for i64 {
    fn parse(source: &mut R) -> Result<Self, ParseError> {
        let mut res = 0i64.to_ne_bytes();
        source.read_exact(&mut res)?;
        Ok(i64::from_be_bytes(res))
    }
}


//------------ u128 ----------------------------------------------------------

impl<W: io::Write> Compose<W> for u128 {
    fn compose(&self, target: &mut W) -> Result<(), io::Error> {
        target.write_all(&self.to_be_bytes())
    }
}

impl<R: io::Read> Parse<R> for u128 {
    fn parse(source: &mut R) -> Result<Self, ParseError> {
        let mut res = 0u128.to_ne_bytes();
        source.read_exact(&mut res)?;
        Ok(u128::from_be_bytes(res))
    }
}


//------------ Option<String> ------------------------------------------------
//
// Encoded as a u32 for the length and then that many bytes. A length of
// zero marks `None`: none of the strings on the stream can legitimately be
// empty.

impl<W: io::Write> Compose<W> for Option<String> {
    fn compose(&self, target: &mut W) -> Result<(), io::Error> {
        match self.as_ref() {
            Some(value) => value.as_str().compose(target),
            None => 0u32.compose(target)
        }
    }
}

impl<R: io::Read> Parse<R> for Option<String> {
    fn parse(source: &mut R) -> Result<Self, ParseError> {
        let len = u32::parse(source)?;
        if len == 0 {
            return Ok(None)
        }
        parse_string(source, len).map(Some)
    }
}


//------------ String --------------------------------------------------------
//
// Encoded as a u32 for the length and then that many bytes. If the length
// doesn’t fit in a u32, the encoder produces an error.

impl<W: io::Write> Compose<W> for str {
    fn compose(&self, target: &mut W) -> Result<(), io::Error> {
        u32::try_from(self.len())
        .map_err(|_| ParseError::format("excessively large string"))?
        .compose(target)?;
        target.write_all(self.as_bytes())
    }
}

impl<R: io::Read> Parse<R> for String {
    fn parse(source: &mut R) -> Result<Self, ParseError> {
        let len = u32::parse(source)?;
        parse_string(source, len)
    }
}

fn parse_string<R: io::Read>(
    source: &mut R, len: u32
) -> Result<String, ParseError> {
    if len > MAX_DATA_LEN {
        return Err(ParseError::format("excessively large string"))
    }
    let mut bits = vec![0u8; len as usize];
    source.read_exact(&mut bits)?;
    String::from_utf8(bits).map_err(|_| {
        ParseError::format("illegally encoded string")
    })
}


//------------ ParseError ----------------------------------------------------

#[derive(Debug)]
pub struct ParseError {
    err: io::Error,
    is_fatal: bool,
}

impl ParseError {
    /// Creates an error for bad formatting.
    pub fn format(
        err: impl Into<Box<dyn error::Error + Send + Sync>>
    ) -> Self {
        ParseError {
            err: io::Error::new(io::ErrorKind::Other, err),
            is_fatal: false,
        }
    }

    /// Returns whether parsing failed fatally.
    ///
    /// Any error other than bad formatting or early EOF is considered
    /// fatal.
    pub fn is_fatal(&self) -> bool {
        self.is_fatal
    }

    /// Returns whether the error was an unexpected EOF.
    pub fn is_eof(&self) -> bool {
        self.err.kind() == io::ErrorKind::UnexpectedEof
    }
}

impl From<io::Error> for ParseError {
    fn from(err: io::Error) -> Self {
        ParseError {
            is_fatal: err.kind() != io::ErrorKind::UnexpectedEof,
            err
        }
    }
}

impl From<ParseError> for io::Error {
    fn from(err: ParseError) -> Self {
        err.err
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.err.fmt(f)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    pub(crate) fn test_write_read<T>(t: T)
    where T: Compose<Vec<u8>> + for<'a> Parse<&'a [u8]> + Eq + std::fmt::Debug
    {
        let mut encoded = Vec::new();
        t.compose(&mut encoded).unwrap();
        let mut slice = encoded.as_slice();
        let decoded = T::parse(&mut slice).unwrap();
        assert!(slice.is_empty());
        assert_eq!(t, decoded)
    }

    #[test]
    fn write_read_u8() {
        test_write_read(0u8);
        test_write_read(127u8);
        test_write_read(255u8);
    }

    #[test]
    fn write_read_u32() {
        test_write_read(0u32);
        test_write_read(127u32);
        test_write_read(0xFFFF_FFFFu32);
    }

    #[test]
    fn write_read_i64() {
        test_write_read(0i64);
        test_write_read(0x7FFF_FFFF_FFFF_FFFFi64);
        test_write_read(-127i64);
    }

    #[test]
    fn write_read_u128() {
        test_write_read(0u128);
        test_write_read(0x0A00_0000u128 << 96);
        test_write_read(!0u128);
    }

    #[test]
    fn write_read_opt_string() {
        test_write_read(Some(String::from("rsync://foo.bar/bla/blubb")));
        test_write_read(None::<String>);
    }

    #[test]
    fn reject_oversized_string() {
        let mut encoded = Vec::new();
        (MAX_DATA_LEN + 1).compose(&mut encoded).unwrap();
        encoded.extend_from_slice(&[0x41; 16]);
        let mut slice = encoded.as_slice();
        assert!(Option::<String>::parse(&mut slice).is_err());
    }
}
