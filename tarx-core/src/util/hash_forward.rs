use std::fs::File;
use std::io::{self, Read, Result, Write};
use std::path::Path;

use md5::{Digest, Md5};

use crate::config::BLOCK_SIZE;

/// Write adapter that feeds every forwarded byte into an MD5 hasher.
pub struct HashingForward<'a, W: Write> {
    inner: W,
    hasher: &'a mut Md5,
    // Total bytes that passed through
    pub counted: u64,
}

impl<'a, W: Write> HashingForward<'a, W> {
    pub fn new(inner: W, hasher: &'a mut Md5) -> Self {
        Self {
            inner,
            hasher,
            counted: 0,
        }
    }
}

impl<'a, W: Write> Write for HashingForward<'a, W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.counted += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

/// Read adapter yielding exactly `limit` bytes and hashing the real ones.
///
/// If the source ends early (the file shrank after it was stat'ed) the rest
/// is zero-filled so the tar member keeps the size its header announced;
/// `padded` tells the caller how many bytes were invented.
pub struct HashingReader<'a, R: Read> {
    inner: R,
    hasher: &'a mut Md5,
    remaining: u64,
    pub counted: u64,
    pub padded: u64,
}

impl<'a, R: Read> HashingReader<'a, R> {
    pub fn new(inner: R, hasher: &'a mut Md5, limit: u64) -> Self {
        Self {
            inner,
            hasher,
            remaining: limit,
            counted: 0,
            padded: 0,
        }
    }
}

impl<'a, R: Read> Read for HashingReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = if self.padded == 0 {
            self.inner.read(&mut buf[..want])?
        } else {
            0
        };
        if n == 0 {
            buf[..want].fill(0);
            self.padded += want as u64;
            self.remaining -= want as u64;
            return Ok(want);
        }
        self.hasher.update(&buf[..n]);
        self.counted += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

pub fn hex_digest(hasher: Md5) -> String {
    hex::encode(hasher.finalize())
}

/// MD5 of a whole file, streamed in `BLOCK_SIZE` reads.
pub fn md5_file(path: &Path) -> Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_digest(hasher))
}

/// Drain `reader` into `sink` while hashing; returns (bytes, hex digest).
pub fn copy_hashed<R: Read, W: Write>(reader: &mut R, sink: W) -> io::Result<(u64, String)> {
    let mut hasher = Md5::new();
    let counted = {
        let mut fwd = HashingForward::new(sink, &mut hasher);
        let mut buf = vec![0u8; BLOCK_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            fwd.write_all(&buf[..n])?;
        }
        fwd.flush()?;
        fwd.counted
    };
    Ok((counted, hex_digest(hasher)))
}
