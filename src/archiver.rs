// Keepsake backup scheduler.
// Copyright 2024-2026 Keepsake contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Write a directory tree into an archive.
//!
//! The walk is depth-first, with children visited in name order. Each entry
//! is checked against an [IgnoreSet] by canonical path; an ignored directory is
//! skipped along with everything below it.
//!
//! Problems reading the source tree are logged and counted but never abort the
//! walk: a file that vanishes or can't be read is simply left out of the
//! archive. A file whose entry name was already written is treated the same
//! way. Only failures writing the archive itself are returned as errors.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use derive_more::{Add, AddAssign};
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::entry_name;
use crate::ignore::IgnoreSet;

/// Size of the buffer used to stream file content into the archive.
const COPY_BUF_SIZE: usize = 64 << 10;

/// Compression level used when none, or an invalid one, is configured.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 4;

/// Counts of what one archiving pass wrote or skipped.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ArchiveStats {
    /// Files written.
    pub files: usize,
    /// Directory entries written.
    pub directories: usize,
    /// Total bytes of file content written, before compression.
    pub bytes: u64,
    /// Entries skipped because they were ignored, or are links to directories.
    pub excluded: usize,
    /// Entries skipped because they couldn't be read, or because an entry
    /// of the same name was already written.
    pub errors: usize,
}

/// Destination for archive entries.
///
/// Files are written as a `start_file` call followed by any number of
/// `write_chunk` calls. If the source fails partway through, `abort_file`
/// discards the partial entry.
///
/// Adding a name that's already in the archive fails with
/// [io::ErrorKind::AlreadyExists] and leaves the archive unchanged.
pub trait ArchiveWriter {
    /// Add an entry for a directory. `name` ends with `/`.
    fn add_directory(&mut self, name: &str) -> io::Result<()>;

    /// Start a file entry. `len` is the expected size, if known.
    fn start_file(&mut self, name: &str, len: u64) -> io::Result<()>;

    /// Append content to the current file entry.
    fn write_chunk(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Discard the file entry most recently started.
    fn abort_file(&mut self) -> io::Result<()>;
}

/// Recursively write `root` into `sink`, naming entries below `prefix`.
///
/// Returns an error only if writing to the sink fails.
pub fn archive_tree(
    root: &Path,
    prefix: &str,
    sink: &mut dyn ArchiveWriter,
    ignore: &IgnoreSet,
) -> io::Result<ArchiveStats> {
    let mut stats = ArchiveStats::default();
    visit(root, &entry_name::normalize(prefix), sink, ignore, &mut stats)?;
    debug!(?root, ?stats, "Archived tree");
    Ok(stats)
}

fn visit(
    path: &Path,
    name: &str,
    sink: &mut dyn ArchiveWriter,
    ignore: &IgnoreSet,
    stats: &mut ArchiveStats,
) -> io::Result<()> {
    if ignore.contains(path) {
        trace!(?path, "Ignored");
        stats.excluded += 1;
        return Ok(());
    }
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!("Error while backing up {name:?}, backup will ignore this file: {err}");
            stats.errors += 1;
            return Ok(());
        }
    };
    if metadata.is_dir() {
        archive_dir(path, name, sink, ignore, stats)
    } else if metadata.file_type().is_symlink() && path.is_dir() {
        debug!(?path, "Not following symlink to directory");
        stats.excluded += 1;
        Ok(())
    } else {
        archive_file(path, name, sink, stats)
    }
}

fn archive_dir(
    path: &Path,
    name: &str,
    sink: &mut dyn ArchiveWriter,
    ignore: &IgnoreSet,
    stats: &mut ArchiveStats,
) -> io::Result<()> {
    if let Some(dir_name) = entry_name::directory(name) {
        match sink.add_directory(&dir_name) {
            Ok(()) => stats.directories += 1,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!(entry = %dir_name, "Directory already in archive; merging contents");
            }
            Err(err) => return Err(err),
        }
    }
    let children = match read_children(path) {
        Ok(children) => children,
        Err(err) => {
            warn!("Error reading directory {name:?}, backup will ignore its contents: {err}");
            stats.errors += 1;
            return Ok(());
        }
    };
    for (child_name, child_path) in children {
        let child_entry = entry_name::join(name, &child_name);
        visit(&child_path, &child_entry, sink, ignore, stats)?;
    }
    Ok(())
}

/// List the children of a directory, sorted by name.
///
/// Children with names that aren't valid UTF-8 can't be named in the archive;
/// they're logged and left out.
fn read_children(path: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut children = Vec::new();
    for dir_entry in fs::read_dir(path)? {
        let dir_entry = dir_entry?;
        match dir_entry.file_name().into_string() {
            Ok(child_name) => children.push((child_name, dir_entry.path())),
            Err(os_name) => warn!("Couldn't decode filename {os_name:?} in {path:?}"),
        }
    }
    children.sort();
    Ok(children)
}

fn open_source(path: &Path) -> io::Result<File> {
    fail::fail_point!("archiver::open-source", |_| {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "injected open failure",
        ))
    });
    File::open(path)
}

fn archive_file(
    path: &Path,
    name: &str,
    sink: &mut dyn ArchiveWriter,
    stats: &mut ArchiveStats,
) -> io::Result<()> {
    let mut file = match open_source(path) {
        Ok(file) => file,
        Err(err) => {
            warn!("Error while backing up file {name:?}, backup will ignore this file: {err}");
            stats.errors += 1;
            return Ok(());
        }
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or_default();
    match sink.start_file(name, len) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            warn!("Duplicate entry {name:?}, backup will ignore this file: {err}");
            stats.errors += 1;
            return Ok(());
        }
        Err(err) => return Err(err),
    }
    let mut buf = vec![0; COPY_BUF_SIZE];
    let mut written = 0u64;
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!("Error while backing up file {name:?}, backup will ignore this file: {err}");
                sink.abort_file()?;
                stats.errors += 1;
                return Ok(());
            }
        };
        sink.write_chunk(&buf[..n])?;
        written += n as u64;
    }
    trace!(name, written, "Archived file");
    stats.files += 1;
    stats.bytes += written;
    Ok(())
}

/// Writes a zip archive.
///
/// Content goes to a temporary file beside the destination, which is renamed
/// into place by [ZipArchiveWriter::finish]. If the writer is dropped without
/// finishing, the temporary file is removed.
pub struct ZipArchiveWriter {
    zip: ZipWriter<NamedTempFile>,
    path: PathBuf,
    compression_level: u32,
    /// Names of all entries written so far.
    names: HashSet<String>,
    /// The file entry being written, if any.
    current: Option<String>,
}

impl ZipArchiveWriter {
    /// Start writing a new archive that will be stored at `path`.
    pub fn create(path: &Path, compression_level: u32) -> io::Result<ZipArchiveWriter> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(crate::TMP_PREFIX)
            .tempfile_in(dir)?;
        debug!(?path, temp = ?temp.path(), compression_level, "Create archive");
        Ok(ZipArchiveWriter {
            zip: ZipWriter::new(temp),
            path: path.to_owned(),
            compression_level: compression_level.min(9),
            names: HashSet::new(),
            current: None,
        })
    }

    /// The final path of the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reserve `name`, failing if an entry of that name was already written.
    fn claim(&mut self, name: &str) -> io::Result<()> {
        if self.names.insert(name.to_owned()) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{name:?} is already in the archive"),
            ))
        }
    }

    fn options(&self) -> SimpleFileOptions {
        if self.compression_level == 0 {
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(self.compression_level as i64))
        }
    }

    /// Write the zip directory and move the archive into place.
    pub fn finish(self) -> io::Result<PathBuf> {
        let mut temp = self.zip.finish().map_err(io::Error::other)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| err.error)?;
        debug!(path = ?self.path, "Finished archive");
        Ok(self.path)
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add_directory(&mut self, name: &str) -> io::Result<()> {
        self.claim(name)?;
        self.current = None;
        let options = self.options();
        self.zip
            .add_directory(name, options)
            .map_err(io::Error::other)
    }

    fn start_file(&mut self, name: &str, len: u64) -> io::Result<()> {
        self.claim(name)?;
        self.current = Some(name.to_owned());
        let options = self.options().large_file(len > u32::MAX as u64);
        self.zip.start_file(name, options).map_err(io::Error::other)
    }

    fn write_chunk(&mut self, buf: &[u8]) -> io::Result<()> {
        self.zip.write_all(buf)
    }

    fn abort_file(&mut self) -> io::Result<()> {
        if let Some(name) = self.current.take() {
            self.names.remove(&name);
        }
        self.zip.abort_file().map_err(io::Error::other)
    }
}

impl std::fmt::Debug for ZipArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipArchiveWriter")
            .field("path", &self.path)
            .field("compression_level", &self.compression_level)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::*;

    /// Collects entries in memory.
    #[derive(Default)]
    struct RecordingWriter {
        entries: BTreeMap<String, Option<Vec<u8>>>,
        current: Option<String>,
    }

    impl ArchiveWriter for RecordingWriter {
        fn add_directory(&mut self, name: &str) -> io::Result<()> {
            assert!(name.ends_with('/'));
            if self.entries.contains_key(name) {
                return Err(io::ErrorKind::AlreadyExists.into());
            }
            self.entries.insert(name.to_owned(), None);
            Ok(())
        }

        fn start_file(&mut self, name: &str, _len: u64) -> io::Result<()> {
            if self.entries.contains_key(name) {
                return Err(io::ErrorKind::AlreadyExists.into());
            }
            self.entries.insert(name.to_owned(), Some(Vec::new()));
            self.current = Some(name.to_owned());
            Ok(())
        }

        fn write_chunk(&mut self, buf: &[u8]) -> io::Result<()> {
            let name = self.current.as_ref().unwrap();
            self.entries
                .get_mut(name)
                .unwrap()
                .as_mut()
                .unwrap()
                .extend_from_slice(buf);
            Ok(())
        }

        fn abort_file(&mut self) -> io::Result<()> {
            let name = self.current.take().unwrap();
            self.entries.remove(&name);
            Ok(())
        }
    }

    impl RecordingWriter {
        fn names(&self) -> Vec<&str> {
            self.entries.keys().map(String::as_str).collect()
        }
    }

    fn sample_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        temp.child("server.properties").write_str("motd=hi\n").unwrap();
        temp.child("world/level.dat").write_str("level").unwrap();
        temp.child("world/region/r.0.0.mca").write_binary(&[7; 5000]).unwrap();
        temp.child("logs").create_dir_all().unwrap();
        temp
    }

    #[test]
    fn archives_whole_tree() {
        let temp = sample_tree();
        let mut sink = RecordingWriter::default();
        let stats = archive_tree(temp.path(), "", &mut sink, &IgnoreSet::new()).unwrap();
        assert_eq!(
            sink.names(),
            [
                "logs/",
                "server.properties",
                "world/",
                "world/level.dat",
                "world/region/",
                "world/region/r.0.0.mca",
            ]
        );
        assert_eq!(
            sink.entries["world/region/r.0.0.mca"].as_deref(),
            Some(&[7u8; 5000][..])
        );
        assert_eq!(stats.files, 3);
        assert_eq!(stats.directories, 3);
        assert_eq!(stats.bytes, 8 + 5 + 5000);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn empty_directories_are_kept() {
        let temp = TempDir::new().unwrap();
        temp.child("a/b/c").create_dir_all().unwrap();
        let mut sink = RecordingWriter::default();
        archive_tree(temp.path(), "", &mut sink, &IgnoreSet::new()).unwrap();
        assert_eq!(sink.names(), ["a/", "a/b/", "a/b/c/"]);
    }

    #[test]
    fn prefix_is_normalized() {
        let temp = sample_tree();
        let mut sink = RecordingWriter::default();
        archive_tree(
            &temp.path().join("world"),
            "./world/.",
            &mut sink,
            &IgnoreSet::new(),
        )
        .unwrap();
        assert_eq!(
            sink.names(),
            [
                "world/",
                "world/level.dat",
                "world/region/",
                "world/region/r.0.0.mca"
            ]
        );
    }

    #[test]
    fn ignored_directory_is_skipped_with_descendants() {
        let temp = sample_tree();
        let ignore = IgnoreSet::from_paths([temp.path().join("world")]);
        let mut sink = RecordingWriter::default();
        let stats = archive_tree(temp.path(), "", &mut sink, &ignore).unwrap();
        assert_eq!(sink.names(), ["logs/", "server.properties"]);
        assert_eq!(stats.excluded, 1);
    }

    #[test]
    fn ignored_file_is_skipped() {
        let temp = sample_tree();
        let ignore = IgnoreSet::from_paths([temp.path().join("world/level.dat")]);
        let mut sink = RecordingWriter::default();
        archive_tree(temp.path(), "", &mut sink, &ignore).unwrap();
        assert!(!sink.entries.contains_key("world/level.dat"));
        assert!(sink.entries.contains_key("world/region/r.0.0.mca"));
    }

    #[cfg(unix)]
    #[test]
    #[traced_test]
    fn unreadable_file_is_skipped_and_walk_continues() {
        let temp = sample_tree();
        temp.child("dangling")
            .symlink_to_file(temp.path().join("vanished"))
            .unwrap();
        let mut sink = RecordingWriter::default();
        let stats = archive_tree(temp.path(), "", &mut sink, &IgnoreSet::new()).unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.files, 3);
        assert!(!sink.entries.contains_key("dangling"));
        assert!(sink.entries.contains_key("world/level.dat"));
        assert!(logs_contain("Error while backing up file \"dangling\""));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_followed() {
        let temp = sample_tree();
        temp.child("loop").symlink_to_dir(temp.path()).unwrap();
        let mut sink = RecordingWriter::default();
        let stats = archive_tree(temp.path(), "", &mut sink, &IgnoreSet::new()).unwrap();
        assert!(!sink.names().iter().any(|n| n.starts_with("loop")));
        assert_eq!(stats.excluded, 1);
    }

    #[test]
    fn zip_round_trip() {
        let temp = sample_tree();
        let out = TempDir::new().unwrap();
        let zip_path = out.path().join("backup.zip");
        let mut writer = ZipArchiveWriter::create(&zip_path, 6).unwrap();
        archive_tree(temp.path(), "", &mut writer, &IgnoreSet::new()).unwrap();
        assert!(!zip_path.exists(), "archive is only visible once finished");
        assert_eq!(writer.finish().unwrap(), zip_path);

        let mut zip = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_owned).collect();
        names.sort();
        assert_eq!(
            names,
            [
                "logs/",
                "server.properties",
                "world/",
                "world/level.dat",
                "world/region/",
                "world/region/r.0.0.mca",
            ]
        );
        let mut content = String::new();
        zip.by_name("server.properties")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "motd=hi\n");
        // Only the finished archive remains in the directory.
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 1);
    }

    #[test]
    #[traced_test]
    fn duplicate_names_are_skipped_and_counted() {
        let temp = sample_tree();
        let other = TempDir::new().unwrap();
        other.child("level.dat").write_str("other level").unwrap();
        other.child("icon.png").write_str("png").unwrap();
        let out = TempDir::new().unwrap();
        let zip_path = out.path().join("dup.zip");
        let mut writer = ZipArchiveWriter::create(&zip_path, 4).unwrap();
        archive_tree(temp.path(), "", &mut writer, &IgnoreSet::new()).unwrap();
        let stats = archive_tree(other.path(), "world", &mut writer, &IgnoreSet::new()).unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.files, 1);
        assert_eq!(stats.directories, 0);
        writer.finish().unwrap();
        assert!(logs_contain("Duplicate entry \"world/level.dat\""));

        let mut zip = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let mut content = String::new();
        zip.by_name("world/level.dat")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "level", "first entry wins");
        assert!(zip.by_name("world/icon.png").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn backslash_in_file_name_is_kept() {
        let temp = TempDir::new().unwrap();
        temp.child("a\\b").write_str("flat").unwrap();
        temp.child("a/b").write_str("nested").unwrap();
        let out = TempDir::new().unwrap();
        let zip_path = out.path().join("names.zip");
        let mut writer = ZipArchiveWriter::create(&zip_path, 4).unwrap();
        let stats = archive_tree(temp.path(), "", &mut writer, &IgnoreSet::new()).unwrap();
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.files, 2);
        writer.finish().unwrap();

        let mut zip = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let mut content = String::new();
        zip.by_name("a\\b")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "flat");
        content.clear();
        zip.by_name("a/b")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "nested");
    }

    #[test]
    fn aborted_name_can_be_written_again() {
        let out = TempDir::new().unwrap();
        let zip_path = out.path().join("abort.zip");
        let mut writer = ZipArchiveWriter::create(&zip_path, 4).unwrap();
        writer.start_file("x", 3).unwrap();
        writer.write_chunk(b"par").unwrap();
        writer.abort_file().unwrap();
        writer.start_file("x", 3).unwrap();
        writer.write_chunk(b"all").unwrap();
        assert_eq!(
            writer.start_file("x", 3).unwrap_err().kind(),
            io::ErrorKind::AlreadyExists
        );
        writer.finish().unwrap();
        let zip = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
    }

    #[test]
    fn stored_archive_with_level_zero() {
        let temp = sample_tree();
        let out = TempDir::new().unwrap();
        let zip_path = out.path().join("stored.zip");
        let mut writer = ZipArchiveWriter::create(&zip_path, 0).unwrap();
        archive_tree(temp.path(), "", &mut writer, &IgnoreSet::new()).unwrap();
        writer.finish().unwrap();
        let mut zip = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let entry = zip.by_name("world/region/r.0.0.mca").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
        assert_eq!(entry.size(), 5000);
    }

    #[test]
    fn dropped_writer_leaves_nothing() {
        let out = TempDir::new().unwrap();
        let writer = ZipArchiveWriter::create(&out.path().join("abandoned.zip"), 4).unwrap();
        drop(writer);
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
