//! Appliance assembly.
//!
//! The initrd is a concatenation of three components, in order:
//!
//! 1. The prebuilt skeleton appliance, `initramfs.<repo>.<cpu>.supermin.img`,
//!    copied verbatim (it is already plain cpio).
//! 2. The whitelisted kernel modules from the chosen module directory.
//! 3. The host files matching the `*.supermin.hostfiles` manifest.
//!
//! Parts 2 and 3 are encoded in-process by [`cpio::CpioWriter`] rather
//! than by an external cpio program: the external tool is slow and the
//! format actually needed is narrow - only the Linux kernel ever reads
//! the result. The sub-streams are joined without intermediate padding;
//! the kernel's unpacker tolerates that, and only the final trailer pads
//! the stream to a 512-byte block.

pub mod cpio;
mod hostfiles;
mod modules;

use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};

use crate::dircache::DirCache;
use crate::trace::Trace;
use self::cpio::CpioWriter;

/// Assemble the appliance initrd at `initrd`.
///
/// `modpath` is the module directory chosen by kernel selection; the
/// other inputs live under `sourcedir`. Any I/O failure is fatal - a
/// partially written initrd is useless and the caller detects failure
/// through the exit status.
pub fn build_appliance(
    sourcedir: &Path,
    host_cpu: &str,
    repo: &str,
    modpath: &Path,
    initrd: &Path,
    cache: &mut DirCache,
    trace: &Trace,
) -> Result<()> {
    let out = File::create(initrd).with_context(|| format!("open: {}", initrd.display()))?;
    let mut writer = CpioWriter::new(out);

    let skeleton = sourcedir.join(format!("initramfs.{}.{}.supermin.img", repo, host_cpu));
    if trace.detailed() {
        trace.detail(&format!("copying skeleton {}", skeleton.display()));
    }
    writer
        .copy_raw_file(&skeleton)
        .with_context(|| format!("copying skeleton image '{}'", skeleton.display()))?;

    modules::write_modules(&mut writer, sourcedir, modpath, trace)?;
    hostfiles::write_hostfiles(&mut writer, sourcedir, host_cpu, repo, cache, trace)?;

    writer.append_trailer()?;

    // Surface deferred write errors now; quietly dropping the file would
    // let a short appliance pass for a complete one.
    let out = writer.into_inner();
    out.sync_all()
        .with_context(|| format!("close: {}", initrd.display()))?;

    Ok(())
}

/// Load a sidecar list file, one entry per line.
///
/// A missing list file is fatal: the sourcedir is expected to carry the
/// complete set of build products, and a partial sourcedir means a
/// broken installation rather than an empty selection.
pub(crate) fn load_lines(path: &Path) -> Result<Vec<String>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading '{}'", path.display()))?;
    Ok(text.lines().map(str::to_owned).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    struct Fixture {
        temp: tempfile::TempDir,
        sourcedir: std::path::PathBuf,
        modpath: std::path::PathBuf,
    }

    fn fixture(skeleton: &[u8], whitelist: &str, hostfiles: &str) -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let sourcedir = temp.path().join("source");
        fs::create_dir(&sourcedir).unwrap();
        fs::write(
            sourcedir.join("initramfs.testrepo.x86_64.supermin.img"),
            skeleton,
        )
        .unwrap();
        fs::write(sourcedir.join("kmod.whitelist"), whitelist).unwrap();
        fs::write(
            sourcedir.join("initramfs.testrepo.x86_64.supermin.hostfiles"),
            hostfiles,
        )
        .unwrap();

        let modpath = temp.path().join("modules");
        fs::create_dir(&modpath).unwrap();

        Fixture {
            temp,
            sourcedir,
            modpath,
        }
    }

    fn build(fx: &Fixture) -> Vec<u8> {
        let initrd = fx.temp.path().join("initrd");
        let mut cache = DirCache::new();
        build_appliance(
            &fx.sourcedir,
            "x86_64",
            "testrepo",
            &fx.modpath,
            &initrd,
            &mut cache,
            &Trace::quiet(),
        )
        .unwrap();
        fs::read(&initrd).unwrap()
    }

    /// Decode (name, content) pairs up to the trailer.
    fn decode(data: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut cursor = std::io::Cursor::new(data.to_vec());
        let mut entries = Vec::new();
        loop {
            let mut reader = ::cpio::NewcReader::new(cursor).expect("reading entry header");
            if reader.entry().is_trailer() {
                break;
            }
            let name = reader.entry().name().to_string();
            let size = reader.entry().file_size() as usize;
            let mut content = vec![0u8; size];
            reader.read_exact(&mut content).expect("reading entry body");
            entries.push((name, content));
            cursor = reader.finish().expect("finishing entry");
        }
        entries
    }

    #[test]
    fn empty_inputs_produce_module_tree_plus_trailer() {
        let fx = fixture(b"", "", "");
        fs::write(fx.modpath.join("readme.txt"), "0123456789").unwrap();

        let data = build(&fx);

        // The smallest 512 multiple that holds the two entries plus the
        // 124-byte trailer record, computed from the entry layout:
        // header(110) + name + NUL, padded to 4, then body padded to 4.
        let align4 = |n: usize| (n + 3) & !3;
        let root_name = fx.modpath.to_str().unwrap().trim_start_matches('/').len();
        let unpadded = align4(110 + root_name + 1)
            + align4(110 + root_name + "/readme.txt".len() + 1)
            + align4(10)
            + 124;
        assert_eq!(data.len(), (unpadded + 511) & !511);

        let entries = decode(&data);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].0.ends_with("modules")); // the walked tree root
        assert!(entries[1].0.ends_with("modules/readme.txt"));
        assert_eq!(entries[1].1, b"0123456789");
    }

    #[test]
    fn skeleton_bytes_come_first_verbatim() {
        // The skeleton here is a valid single-entry cpio stream so that
        // the concatenated result stays decodable end to end.
        let mut skeleton_writer = CpioWriter::new(Vec::new());
        {
            let temp = tempfile::tempdir().unwrap();
            let base = temp.path().join("init");
            fs::write(&base, "#!/bin/sh\n").unwrap();
            skeleton_writer.append_path(&base).unwrap();
        }
        let skeleton = skeleton_writer.into_inner();

        let fx = fixture(&skeleton, "", "");
        fs::write(fx.modpath.join("modules.dep"), "").unwrap();

        let data = build(&fx);
        assert_eq!(&data[..skeleton.len()], skeleton.as_slice());

        let entries = decode(&data);
        assert_eq!(entries.len(), 3);
        assert!(entries[0].0.ends_with("init"));
        assert!(entries[1].0.ends_with("modules"));
        assert!(entries[2].0.ends_with("modules.dep"));
    }

    #[test]
    fn hostfiles_follow_the_module_tree() {
        let fx = fixture(b"", "", "");
        let host_file = fx.temp.path().join("etc-hosts");
        fs::write(&host_file, "127.0.0.1 localhost\n").unwrap();
        fs::write(
            fx.sourcedir
                .join("initramfs.testrepo.x86_64.supermin.hostfiles"),
            format!("{}\n", host_file.display()),
        )
        .unwrap();

        let data = build(&fx);
        let entries = decode(&data);
        let last = entries.last().unwrap();
        assert!(last.0.ends_with("etc-hosts"));
        assert_eq!(last.1, b"127.0.0.1 localhost\n");
    }

    #[test]
    fn missing_skeleton_is_fatal() {
        let fx = fixture(b"", "", "");
        fs::remove_file(
            fx.sourcedir
                .join("initramfs.testrepo.x86_64.supermin.img"),
        )
        .unwrap();

        let initrd = fx.temp.path().join("initrd");
        let mut cache = DirCache::new();
        let err = build_appliance(
            &fx.sourcedir,
            "x86_64",
            "testrepo",
            &fx.modpath,
            &initrd,
            &mut cache,
            &Trace::quiet(),
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("skeleton"));
    }
}
