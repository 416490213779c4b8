//! The pluggable storage backend. A Queue Runner dispatches each
//! completed fetch's descriptor to one of these methods and turns the
//! `std::io::Result` back into the I/O Command's `result` field
//! (Ok(n) -> n as i32, Err(e) -> -errno).
//!
//! Required methods cover READ/WRITE/FLUSH; the optional methods default
//! to behavior that is correct but not necessarily efficient, so a
//! backend that doesn't special-case DISCARD or WRITE_ZEROES still works.

use std::io;

pub trait Backend: Send + Sync {
    /// Read `len` bytes starting at `offset` into `buf`. `buf.len() >= len`
    /// is guaranteed by the caller; only the first `len` bytes are
    /// meaningful on return.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `buf` at `offset`.
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Logical size of the backing store in bytes.
    fn size(&self) -> u64;

    /// Durably commit all writes issued so far.
    fn flush(&self) -> io::Result<()>;

    /// Deallocate (TRIM) the byte range `[offset, offset + len)`. The
    /// default treats discard as a hint and no-ops it: a backend that
    /// can't reclaim space still behaves correctly, it just doesn't
    /// reclaim anything.
    fn discard(&self, _offset: u64, _len: u64) -> io::Result<()> {
        Ok(())
    }

    /// Zero-fill `[offset, offset + len)`. The default falls back to a
    /// real write of zero bytes, so a backend gets WRITE_ZEROES support
    /// for free at the cost of actually transferring the zeroes.
    fn write_zeroes(&self, offset: u64, len: u64) -> io::Result<()> {
        const CHUNK: usize = 64 * 1024;
        let zeroes = [0u8; CHUNK];
        let mut remaining = len;
        let mut at = offset;
        while remaining > 0 {
            let n = remaining.min(CHUNK as u64) as usize;
            self.write_at(at, &zeroes[..n])?;
            at += n as u64;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// FUA support: commit a single write durably without flushing the
    /// whole backend. The default just defers to `flush`.
    fn sync(&self) -> io::Result<()> {
        self.flush()
    }
}

/// Map a backend result into the I/O Command `result` field's convention:
/// non-negative nr_bytes on success, negative errno on failure.
pub fn result_to_wire(r: io::Result<usize>) -> i32 {
    match r {
        Ok(n) => n as i32,
        Err(e) => -(e.raw_os_error().unwrap_or(libc_eio())),
    }
}

/// `EIO`'s numeric value, hand-picked rather than depending on `libc`
/// from this dependency-free crate.
const fn libc_eio() -> i32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MemBackend(Mutex<Vec<u8>>);

    impl Backend for MemBackend {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            let data = self.0.lock().unwrap();
            let start = offset as usize;
            let n = buf.len().min(data.len().saturating_sub(start));
            buf[..n].copy_from_slice(&data[start..start + n]);
            Ok(n)
        }

        fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
            let mut data = self.0.lock().unwrap();
            let start = offset as usize;
            if data.len() < start + buf.len() {
                data.resize(start + buf.len(), 0);
            }
            data[start..start + buf.len()].copy_from_slice(buf);
            Ok(buf.len())
        }

        fn size(&self) -> u64 {
            self.0.lock().unwrap().len() as u64
        }

        fn flush(&self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn default_write_zeroes_falls_back_to_writes() {
        let b = MemBackend(Mutex::new(vec![0xff; 128]));
        b.write_zeroes(0, 128).unwrap();
        let mut buf = [0u8; 128];
        b.read_at(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn result_to_wire_maps_success_and_error() {
        assert_eq!(result_to_wire(Ok(42)), 42);
        let err = io::Error::from_raw_os_error(22);
        assert_eq!(result_to_wire(Err(err)), -22);
    }
}
