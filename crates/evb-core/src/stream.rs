//! Reading and writing the ordered fragment stream.
//!
//! The stream is the same `(header, body)` layout used in submissions,
//! repeated until end of file.

use bytes::Bytes;
use std::io::{self, Read, Write};

use crate::fragment::{Fragment, FragmentHeader, FRAGMENT_HEADER_SIZE};

/// Fill `buf` as far as the reader allows.
///
/// Returns the number of bytes read; fewer than `buf.len()` only at end of
/// stream.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Pulls fragments off a byte stream one at a time.
pub struct FragmentReader<R> {
    inner: R,
    fragments_read: u64,
}

impl<R: Read> FragmentReader<R> {
    /// Read fragments from `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            fragments_read: 0,
        }
    }

    /// Read the next fragment.
    ///
    /// `Ok(None)` means the stream ended on a fragment boundary; a stream that
    /// ends mid-record yields `UnexpectedEof`.
    pub fn next_fragment(&mut self) -> io::Result<Option<Fragment>> {
        let mut header_bytes = [0u8; FRAGMENT_HEADER_SIZE];
        match read_full(&mut self.inner, &mut header_bytes)? {
            0 => return Ok(None),
            FRAGMENT_HEADER_SIZE => {}
            n => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended inside a fragment header ({} of {} bytes)", n, FRAGMENT_HEADER_SIZE),
                ))
            }
        }

        let header = FragmentHeader::decode(&header_bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut body = vec![0u8; header.size as usize];
        self.inner.read_exact(&mut body)?;

        self.fragments_read += 1;
        Ok(Some(Fragment::from_parts(header, Bytes::from(body))))
    }

    /// Complete fragments returned so far.
    pub fn fragments_read(&self) -> u64 {
        self.fragments_read
    }

    /// Give back the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for FragmentReader<R> {
    type Item = io::Result<Fragment>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_fragment().transpose()
    }
}

/// Write one fragment in stream layout.
pub fn write_fragment<W: Write>(out: &mut W, fragment: &Fragment) -> io::Result<()> {
    let header = fragment
        .header()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    out.write_all(&header.to_bytes())?;
    out.write_all(&fragment.body)
}
