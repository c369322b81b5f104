//! Plain "newc" cpio encoding.
//!
//! The appliance is consumed only by the Linux kernel's initramfs
//! unpacker, so this implements exactly the subset it reads: the
//! `070701` ASCII header format, uncompressed, with entries padded to
//! 4 bytes and the whole stream padded to a 512-byte block after the
//! `TRAILER!!!` record.
//!
//! Format reference:
//! <https://www.kernel.org/doc/html/latest/driver-api/early-userspace/buffer-format.html>

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Chunk size for streaming file contents, large for fewest syscalls.
const BUFFER_SIZE: usize = 65536;

/// 6-byte magic plus thirteen 8-digit hex fields.
const HEADER_LEN: usize = 6 + 13 * 8;

/// Sentinel entry name ending the archive.
const TRAILER_NAME: &str = "TRAILER!!!";

/// Header fields of one entry, in the order they are encoded.
///
/// Every field is written as exactly 8 uppercase hex digits. The
/// checksum slot is always zero; the kernel ignores it for `070701`
/// archives.
#[derive(Clone, Copy, Default)]
struct EntryHeader {
    ino: u32,
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    mtime: u32,
    filesize: u32,
    dev_major: u32,
    dev_minor: u32,
    rdev_major: u32,
    rdev_minor: u32,
}

/// Streaming archive writer owning the output sink and the running byte
/// offset. The format has no random access, so all entries go through
/// one writer in append order.
pub struct CpioWriter<W: Write> {
    out: W,
    offset: u64,
}

impl<W: Write> CpioWriter<W> {
    pub fn new(out: W) -> Self {
        CpioWriter { out, offset: 0 }
    }

    /// Bytes written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// lstat `path` and append it as one archive entry.
    pub fn append_path(&mut self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("lstat: {}", path.display()))?;
        self.append_with_metadata(path, &meta)
    }

    /// Append one archive entry for `path` as described by `meta`.
    ///
    /// `meta` must come from a non-following stat so symlinks are
    /// archived as links. Only regular files and symlinks carry a body;
    /// directories, devices, fifos and sockets are header-only with a
    /// zero length.
    pub fn append_with_metadata(&mut self, path: &Path, meta: &fs::Metadata) -> Result<()> {
        let file_type = meta.file_type();
        let has_body = file_type.is_file() || file_type.is_symlink();
        let body_len = if has_body { meta.size() } else { 0 };

        let (dev_major, dev_minor) = dev_split(meta.dev());
        let (rdev_major, rdev_minor) = dev_split(meta.rdev());
        let header = EntryHeader {
            ino: meta.ino() as u32,
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            nlink: meta.nlink() as u32,
            mtime: meta.mtime() as u32,
            filesize: body_len as u32,
            dev_major,
            dev_minor,
            rdev_major,
            rdev_minor,
        };
        self.write_header(path.as_os_str().as_bytes(), &header)?;

        if has_body {
            if file_type.is_file() {
                self.append_file_body(path, body_len)?;
            } else {
                self.append_link_body(path, body_len)?;
            }
            self.write_padding(pad4(body_len as usize))?;
        }

        Ok(())
    }

    /// Copy an existing file into the stream byte for byte.
    ///
    /// Used for the prebuilt skeleton image, which is already a valid
    /// cpio stream and needs no re-encoding.
    pub fn copy_raw_file(&mut self, path: &Path) -> Result<()> {
        let mut file =
            File::open(path).with_context(|| format!("open: {}", path.display()))?;
        let mut buffer = [0u8; BUFFER_SIZE];
        loop {
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("read: {}", path.display()))
                }
            };
            self.write_all(&buffer[..n])?;
        }
        Ok(())
    }

    /// End the archive: sentinel record, then zero-fill so the total
    /// stream length is a multiple of 512 bytes.
    pub fn append_trailer(&mut self) -> Result<()> {
        let header = EntryHeader {
            nlink: 1,
            ..EntryHeader::default()
        };
        self.write_header(TRAILER_NAME.as_bytes(), &header)?;

        let aligned = (self.offset + 511) & !511;
        self.write_padding((aligned - self.offset) as usize)?;
        debug_assert_eq!(self.offset % 512, 0);
        Ok(())
    }

    /// Encode the fixed header, the normalized entry name with its NUL
    /// terminator, and the padding that realigns the stream to 4 bytes.
    fn write_header(&mut self, name: &[u8], header: &EntryHeader) -> Result<()> {
        // The kernel unpacks names relative to the rootfs.
        let name = name.strip_prefix(b"/").unwrap_or(name);
        let name: &[u8] = if name.is_empty() { b"." } else { name };
        let name_len = name.len() + 1;

        let encoded = format!(
            "070701{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}",
            header.ino,
            header.mode,
            header.uid,
            header.gid,
            header.nlink,
            header.mtime,
            header.filesize,
            header.dev_major,
            header.dev_minor,
            header.rdev_major,
            header.rdev_minor,
            name_len as u32,
            0u32,
        );
        self.write_all(encoded.as_bytes())?;
        self.write_all(name)?;
        self.write_all(&[0])?;
        self.write_padding(pad4(HEADER_LEN + name_len))
    }

    /// Stream a regular file's content, verifying that exactly the
    /// length recorded in the header gets written. The file was stat'd
    /// earlier; anything else is a stat/read race and a truncated or
    /// overlong body would corrupt every later entry in the stream.
    fn append_file_body(&mut self, path: &Path, expected: u64) -> Result<()> {
        let mut file =
            File::open(path).with_context(|| format!("open: {}", path.display()))?;
        let mut buffer = [0u8; BUFFER_SIZE];
        let mut count: u64 = 0;
        loop {
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("read: {}", path.display()))
                }
            };
            self.write_all(&buffer[..n])?;
            count += n as u64;
            if count > expected {
                bail!("{}: file has increased in size", path.display());
            }
        }
        if count != expected {
            bail!("{}: file has changed size", path.display());
        }
        Ok(())
    }

    /// A symlink's body is its target path, with the stat-reported size
    /// as the expected length.
    fn append_link_body(&mut self, path: &Path, expected: u64) -> Result<()> {
        let target =
            fs::read_link(path).with_context(|| format!("readlink: {}", path.display()))?;
        let bytes = target.as_os_str().as_bytes();
        if bytes.len() as u64 != expected {
            bail!("{}: symlink target has changed size", path.display());
        }
        self.write_all(bytes)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.out.write_all(buf).context("write")?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn write_padding(&mut self, len: usize) -> Result<()> {
        const ZEROES: [u8; 512] = [0; 512];
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(ZEROES.len());
            self.write_all(&ZEROES[..n])?;
            remaining -= n;
        }
        Ok(())
    }
}

/// Zero bytes needed to bring `len` up to a 4-byte multiple.
fn pad4(len: usize) -> usize {
    (4 - (len & 3)) & 3
}

fn dev_split(dev: u64) -> (u32, u32) {
    // SAFETY: major/minor only shuffle bits of the device number.
    unsafe { (libc::major(dev), libc::minor(dev)) }
}
