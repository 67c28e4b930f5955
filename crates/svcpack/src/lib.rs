//! # Svcpack
//!
//! A small, fixed-order binary stream used by every service message.
//!
//! ## Philosophy
//!
//! - **Order is the schema**: There are no tags. Writer and reader must agree on
//!   the field sequence, which makes the field order itself the wire format.
//! - **Bounded**: The reader is a zero-copy, bounds-checked view. Every read
//!   returns `Result`, nothing panics on short or malformed input.
//! - **Back-patching**: Length fields can be reserved up front and patched once
//!   the variable sized payload behind them is written.
//!
//! ## Format
//!
//! - **Scalars**: `[Data: N]`
//! - **Blobs**: `[Len: 4b][Data: Len]`
//!
//! All integers are Little-Endian.


/// Stream serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd { needed: usize, remaining: usize },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// A boolean byte other than 0 or 1.
    InvalidBool(u8),
    /// Blob length exceeds `u32::MAX`.
    BlobTooLarge(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedEnd { needed, remaining } => {
                write!(f, "Unexpected end of stream: needed {} bytes, {} remaining", needed, remaining)
            }
            Error::InvalidUtf8 => write!(f, "String data is not valid UTF-8"),
            Error::InvalidBool(b) => write!(f, "Invalid bool byte: {:#04x}", b),
            Error::BlobTooLarge(len) => write!(f, "Blob of {} bytes exceeds u32 length", len),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for stream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Position of a reserved `u32` slot inside a `Writer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

/// An append-only stream writer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.bytes(v.as_bytes())
    }

    /// Writes a length-prefixed blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        let len = u32::try_from(v.len()).map_err(|_| Error::BlobTooLarge(v.len()))?;
        self.u32(len);
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Appends raw bytes without a length prefix.
    pub fn raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Reserves a `u32` slot to be filled in later with `patch_u32`.
    pub fn reserve_u32(&mut self) -> Mark {
        let mark = Mark(self.buf.len());
        self.u32(0);
        mark
    }

    /// Overwrites a previously reserved slot.
    pub fn patch_u32(&mut self, mark: Mark, v: u32) {
        self.buf[mark.0..mark.0 + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Writes any packable value.
    pub fn put<T: Pack + ?Sized>(&mut self, v: &T) -> Result<()> {
        v.pack(self)
    }
}

/// A bounds-checked cursor over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    slice: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(slice: &'a [u8]) -> Self {
        Self { slice, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.slice.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Everything not consumed yet.
    pub fn rest(&self) -> &'a [u8] {
        &self.slice[self.pos..]
    }

    #[inline]
    fn need(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            Err(Error::UnexpectedEnd { needed: n, remaining: self.remaining() })
        } else {
            Ok(())
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let slice = &self.slice[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::InvalidBool(b)),
        }
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn str(&mut self) -> Result<&'a str> {
        let raw = self.bytes()?;
        std::str::from_utf8(raw).map_err(|_| Error::InvalidUtf8)
    }

    /// Reads `n` raw bytes with no length prefix.
    pub fn raw(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Reads any unpackable value.
    pub fn get<T: Unpack>(&mut self) -> Result<T> {
        T::unpack(self)
    }
}

/// Types that write themselves into a stream.
///
/// Implementations must write fields in a fixed order and call the
/// implementation of any embedded base value first.
pub trait Pack {
    fn pack(&self, w: &mut Writer) -> Result<()>;
}

/// Types that rebuild themselves from a stream, mirroring `Pack`.
pub trait Unpack: Sized {
    fn unpack(r: &mut Reader<'_>) -> Result<Self>;
}

impl Pack for str {
    fn pack(&self, w: &mut Writer) -> Result<()> {
        w.str(self)
    }
}

impl Pack for String {
    fn pack(&self, w: &mut Writer) -> Result<()> {
        w.str(self)
    }
}

impl Unpack for String {
    fn unpack(r: &mut Reader<'_>) -> Result<Self> {
        r.str().map(str::to_owned)
    }
}

macro_rules! impl_scalar {
    ($($ty:ident),*) => {
        $(
            impl Pack for $ty {
                fn pack(&self, w: &mut Writer) -> Result<()> {
                    w.$ty(*self);
                    Ok(())
                }
            }

            impl Unpack for $ty {
                fn unpack(r: &mut Reader<'_>) -> Result<Self> {
                    r.$ty()
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, u64, i32, bool);

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, w: &mut Writer) -> Result<()> {
        let len = u32::try_from(self.len()).map_err(|_| Error::BlobTooLarge(self.len()))?;
        w.u32(len);
        for item in self {
            item.pack(w)?;
        }
        Ok(())
    }
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack(r: &mut Reader<'_>) -> Result<Self> {
        let len = r.u32()? as usize;
        // Cap the preallocation by what the buffer could possibly hold.
        let mut out = Vec::with_capacity(len.min(r.remaining()));
        for _ in 0..len {
            out.push(T::unpack(r)?);
        }
        Ok(out)
    }
}
