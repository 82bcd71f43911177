// Copyright 2017 qpdb Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::borrow::Cow;
use std::convert;
use std::error;
use std::fmt;
use std::io;
use std::result;

use scroll::ctx::TryFromCtx;
use scroll::{self, Endian, Pread, LE};

use crate::qpdb::InvalidReason;

/// An error that occurred while reading an image or querying the symbol service.
#[derive(Debug)]
pub enum Error {
    /// The input data was not recognized as a PE image.
    UnrecognizedFileFormat,

    /// The optional header magic is neither PE32 nor PE32+.
    UnsupportedOptionalHeader(u16),

    /// The image does not carry a debug directory.
    MissingDebugDirectory,

    /// No section of the image covers the given virtual address.
    AddressNotMapped(u32),

    /// Unexpectedly reached end of input.
    ///
    /// Raised whenever an offset read from the image points past the end of the buffer.
    UnexpectedEof,

    /// A parse error from scroll.
    ScrollError(scroll::Error),

    /// An IO error occurred while reading the image.
    IoError(io::Error),

    /// A GUID string was not 32 uppercase hexadecimal digits.
    InvalidGuid(String),

    /// An empty symbol name was part of a query.
    EmptySymbolName,

    /// A query was issued on an instance that failed to initialize.
    InvalidState(InvalidReason),

    /// The request could not be sent or no response was received.
    Transport(Box<dyn error::Error + Send + Sync>),

    /// The symbol service answered with a status other than 200.
    HttpStatus(u16),

    /// The response body is not a JSON object of names to signed 64-bit offsets.
    Protocol(serde_json::Error),

    /// The symbol service did not resolve the requested name.
    SymbolNotFound(String),

    /// The query was cancelled through its `CancelToken`.
    Cancelled,
}

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// The image file could not be opened or read.
    FileAccess,
    /// The image layout is malformed.
    Format,
    /// A query was attempted on an invalid instance.
    InvalidState,
    /// Network failure or non-success status.
    Transport,
    /// The response body has an unexpected shape.
    Protocol,
    /// A single requested name was absent from the response.
    NotFound,
    /// The caller passed a malformed argument.
    InvalidInput,
    /// The query was cancelled.
    Cancelled,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match *self {
            Error::IoError(_) => ErrorKind::FileAccess,
            Error::UnrecognizedFileFormat
            | Error::UnsupportedOptionalHeader(_)
            | Error::MissingDebugDirectory
            | Error::AddressNotMapped(_)
            | Error::UnexpectedEof
            | Error::ScrollError(_) => ErrorKind::Format,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::Transport(_) | Error::HttpStatus(_) => ErrorKind::Transport,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::SymbolNotFound(_) => ErrorKind::NotFound,
            Error::InvalidGuid(_) | Error::EmptySymbolName => ErrorKind::InvalidInput,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref e) => Some(e),
            Error::ScrollError(ref e) => Some(e),
            Error::Transport(ref e) => Some(e.as_ref()),
            Error::Protocol(ref e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::UnrecognizedFileFormat => write!(f, "The input data was not recognized as a PE image"),
            Error::UnsupportedOptionalHeader(magic) => write!(f, "Unsupported optional header magic (0x{:04x})", magic),
            Error::MissingDebugDirectory => write!(f, "The image does not contain a debug directory"),
            Error::AddressNotMapped(rva) => write!(f, "No section maps virtual address {:#x}", rva),
            Error::UnexpectedEof => write!(f, "Unexpectedly reached end of input"),
            Error::ScrollError(ref e) => write!(f, "Parse error: {}", e),
            Error::IoError(ref e) => write!(f, "IO error while reading image: {}", e),
            Error::InvalidGuid(ref guid) => write!(f, "Invalid GUID string {:?}", guid),
            Error::EmptySymbolName => write!(f, "Symbol names must not be empty"),
            Error::InvalidState(reason) => write!(f, "Invalid file, cannot get pdb info ({})", reason),
            Error::Transport(ref e) => write!(f, "Request failed: {}", e),
            Error::HttpStatus(status) => write!(f, "Request failed with status {}", status),
            Error::Protocol(ref e) => write!(f, "Malformed symbol service response: {}", e),
            Error::SymbolNotFound(ref name) => write!(f, "Symbol {:?} not found", name),
            Error::Cancelled => write!(f, "The query was cancelled"),
        }
    }
}

impl convert::From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e)
    }
}

impl convert::From<scroll::Error> for Error {
    fn from(e: scroll::Error) -> Self {
        match e {
            // Convert a couple of scroll errors into EOF.
            scroll::Error::BadOffset(_) | scroll::Error::TooBig { .. } => Error::UnexpectedEof,
            _ => Error::ScrollError(e),
        }
    }
}

impl convert::From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(Box::new(e))
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Provides bounds-checked little-endian access to a &[u8].
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct ParseBuffer<'b>(&'b [u8], usize);

macro_rules! def_parse {
    ( $( ($n:ident, $t:ty) ),* $(,)* ) => {
        $(#[doc(hidden)]
          #[inline]
          pub fn $n(&mut self) -> Result<$t> {
              Ok(self.parse()?)
          })*
    }
}

macro_rules! def_peek {
    ( $( ($n:ident, $t:ty) ),* $(,)* ) => {
        $(#[doc(hidden)]
          #[inline]
          pub fn $n(&mut self) -> Result<$t> {
              Ok(self.0.pread_with(self.1, LE)?)
          })*
    }
}

impl<'b> ParseBuffer<'b> {
    /// Create a buffer positioned at `offset` within `data`.
    ///
    /// Fails with `UnexpectedEof` if `offset` lies past the end of `data`.
    pub fn at(data: &'b [u8], offset: usize) -> Result<Self> {
        let mut buf = ParseBuffer::from(data);
        buf.seek(offset)?;
        Ok(buf)
    }

    /// Return the remaining length of the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len() - self.1
    }

    /// Return the position within the parent slice.
    #[inline]
    pub fn pos(&self) -> usize {
        self.1
    }

    /// Move to an absolute position within the parent slice.
    #[inline]
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.0.len() {
            return Err(Error::UnexpectedEof);
        }
        self.1 = pos;
        Ok(())
    }

    /// Skip `n` bytes of input.
    #[inline]
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn parse<T>(&mut self) -> Result<T>
    where
        T: TryFromCtx<'b, Endian, [u8], Error = scroll::Error>,
    {
        Ok(self.0.gread_with(&mut self.1, LE)?)
    }

    def_parse!((parse_u16, u16), (parse_u32, u32),);

    def_peek!((peek_u16, u16),);

    /// Parse a NUL-terminated string from the input.
    ///
    /// The terminator must appear before the end of the parent slice.
    #[inline]
    pub fn parse_cstring(&mut self) -> Result<RawString<'b>> {
        let input = &self.0[self.1..];
        let null_idx = input.iter().position(|ch| *ch == 0);

        if let Some(idx) = null_idx {
            self.1 += idx + 1;
            Ok(RawString::from(&input[..idx]))
        } else {
            Err(Error::UnexpectedEof)
        }
    }

    /// Take n bytes from the input
    #[inline]
    pub fn take(&mut self, n: usize) -> Result<&'b [u8]> {
        if self.len() >= n {
            let input = &self.0[self.1..self.1 + n];
            self.1 += n;
            Ok(input)
        } else {
            Err(Error::UnexpectedEof)
        }
    }
}

impl<'b> From<&'b [u8]> for ParseBuffer<'b> {
    fn from(buf: &'b [u8]) -> Self {
        ParseBuffer(buf, 0)
    }
}

/// `RawString` refers to a `&[u8]` that physically resides somewhere inside an image.
///
/// A `RawString` may not be valid UTF-8.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawString<'b>(&'b [u8]);

impl<'b> fmt::Debug for RawString<'b> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawString::from({:?})", self.to_string())
    }
}

impl<'b> RawString<'b> {
    /// Returns a UTF-8 `String`, substituting in replacement characters as needed.
    ///
    /// Debug record names are almost always 7-bit ASCII paths, so this rarely copies.
    #[inline]
    pub fn to_string(&self) -> Cow<'b, str> {
        String::from_utf8_lossy(self.0)
    }
}

impl<'b> From<&'b [u8]> for RawString<'b> {
    fn from(buf: &'b [u8]) -> Self {
        RawString(buf)
    }
}
