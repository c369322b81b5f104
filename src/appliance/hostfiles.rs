//! Host file selection.
//!
//! The hostfiles list is generated at package-install time from the
//! distro's file database, so at assembly time some entries may name
//! paths that no longer exist on this host. Those are skipped silently;
//! only entries that resolve get mirrored into the appliance.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::appliance::cpio::CpioWriter;
use crate::appliance::load_lines;
use crate::dircache::DirCache;
use crate::filter::filter_glob;
use crate::trace::Trace;

/// Append every entry of `initramfs.<repo>.<cpu>.supermin.hostfiles`
/// that resolves on the live filesystem.
///
/// Each line is a path, optionally prefixed with `.` (stripped) and
/// optionally containing `*`/`?` in its final component. Wildcard lines
/// are expanded against the cached listing of their directory; literal
/// lines are included when they lstat successfully.
pub(crate) fn write_hostfiles<W: Write>(
    writer: &mut CpioWriter<W>,
    sourcedir: &Path,
    host_cpu: &str,
    repo: &str,
    cache: &mut DirCache,
    trace: &Trace,
) -> Result<()> {
    let list_path = sourcedir.join(format!(
        "initramfs.{}.{}.supermin.hostfiles",
        repo, host_cpu
    ));

    for line in load_lines(&list_path)? {
        let hostfile = line.strip_prefix('.').unwrap_or(&line);

        if hostfile.contains('*') || hostfile.contains('?') {
            let (dirname, pattern) = hostfile.rsplit_once('/').ok_or_else(|| {
                anyhow!(
                    "malformed hostfiles entry '{}' in {}: wildcard without a directory",
                    line,
                    list_path.display()
                )
            })?;

            let listing = cache.list(Path::new(dirname))?;
            let matches = filter_glob(listing, pattern)?;
            for name in &matches {
                let path = Path::new(dirname).join(name);
                if trace.detailed() {
                    trace.detail(&format!(
                        "including host file {} (matches {})",
                        path.display(),
                        pattern
                    ));
                }
                writer.append_path(&path)?;
            }
        } else if let Ok(meta) = fs::symlink_metadata(hostfile) {
            if trace.detailed() {
                trace.detail(&format!(
                    "including host file {} (directly referenced)",
                    hostfile
                ));
            }
            writer.append_with_metadata(Path::new(hostfile), &meta)?;
        }
        // Entries that do not exist are expected (stale hint lists);
        // skip without comment.
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_names(data: &[u8]) -> Vec<String> {
        let mut cursor = std::io::Cursor::new(data.to_vec());
        let mut names = Vec::new();
        loop {
            let reader = cpio::NewcReader::new(cursor).expect("reading entry header");
            if reader.entry().is_trailer() {
                break;
            }
            names.push(reader.entry().name().to_string());
            cursor = reader.finish().expect("finishing entry");
        }
        names
    }

    fn build(lines: &str) -> Vec<String> {
        let temp = tempfile::tempdir().unwrap();
        let sourcedir = temp.path().join("source");
        fs::create_dir(&sourcedir).unwrap();
        fs::write(
            sourcedir.join("initramfs.testrepo.x86_64.supermin.hostfiles"),
            lines,
        )
        .unwrap();

        let mut writer = CpioWriter::new(Vec::new());
        let mut cache = DirCache::new();
        write_hostfiles(
            &mut writer,
            &sourcedir,
            "x86_64",
            "testrepo",
            &mut cache,
            &Trace::quiet(),
        )
        .unwrap();
        writer.append_trailer().unwrap();
        archive_names(&writer.into_inner())
    }

    #[test]
    fn literal_entry_is_included() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("fstab");
        fs::write(&file, "contents").unwrap();

        let names = build(&format!("{}\n", file.display()));
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with("fstab"));
    }

    #[test]
    fn leading_dot_is_stripped() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("hosts");
        fs::write(&file, "contents").unwrap();

        let names = build(&format!(".{}\n", file.display()));
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with("hosts"));
    }

    #[test]
    fn wildcard_entry_expands_against_its_directory() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("lib-a.so.1"), "").unwrap();
        fs::write(temp.path().join("lib-b.so.2"), "").unwrap();
        fs::write(temp.path().join("README"), "").unwrap();

        let mut names = build(&format!("{}/lib-*.so.*\n", temp.path().display()));
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("lib-a.so.1"));
        assert!(names[1].ends_with("lib-b.so.2"));
    }

    #[test]
    fn missing_entries_are_skipped_silently() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("present");
        fs::write(&file, "").unwrap();

        let names = build(&format!(
            "/nonexistent/path\n{}/absent-*\n{}\n",
            temp.path().display(),
            file.display()
        ));
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with("present"));
    }

    #[test]
    fn dangling_symlink_is_still_archived() {
        // lstat succeeds on a dangling symlink, so the link itself goes
        // into the appliance even though its target is missing.
        let temp = tempfile::tempdir().unwrap();
        let link = temp.path().join("dangling");
        std::os::unix::fs::symlink("/nonexistent/target", &link).unwrap();

        let names = build(&format!("{}\n", link.display()));
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with("dangling"));
    }

    #[test]
    fn wildcard_without_directory_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let sourcedir = temp.path().join("source");
        fs::create_dir(&sourcedir).unwrap();
        fs::write(
            sourcedir.join("initramfs.testrepo.x86_64.supermin.hostfiles"),
            "orphan-*\n",
        )
        .unwrap();

        let mut writer = CpioWriter::new(Vec::new());
        let mut cache = DirCache::new();
        let err = write_hostfiles(
            &mut writer,
            &sourcedir,
            "x86_64",
            "testrepo",
            &mut cache,
            &Trace::quiet(),
        )
        .unwrap_err();
        assert!(format!("{}", err).contains("malformed hostfiles entry"));
    }
}
