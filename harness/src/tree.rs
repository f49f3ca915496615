//! File-tree transfer and comparison.
//!
//! Local directories travel into units as tar archives rooted at the
//! directory's base name; trees copied out of units are unpacked into a
//! [`ScratchTree`] that is deleted when dropped, on every exit path.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, error, info};

use crate::error::{HarnessError, Result};
use crate::runtime::{ContainerRuntime, UnitHandle};

/// Base name of a local directory, as it appears inside archives.
pub fn base_name(dir: &Path) -> Result<String> {
    dir.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            HarnessError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no usable base name", dir.display()),
            ))
        })
}

/// Archive a local directory, preserving relative paths under its base name.
pub fn archive_directory(dir: &Path) -> Result<Vec<u8>> {
    let name = base_name(dir)?;
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(&name, dir)?;
    Ok(builder.into_inner()?)
}

/// Copy a local directory into a unit, below `container_dir`.
pub async fn inject_directory(
    runtime: &dyn ContainerRuntime,
    unit: &UnitHandle,
    local_dir: &Path,
    container_dir: &str,
) -> Result<()> {
    debug!(
        unit = %unit,
        local = %local_dir.display(),
        container = container_dir,
        "copy local directory into unit"
    );
    let archive = archive_directory(local_dir)?;
    runtime.copy_in(unit, container_dir, archive).await
}

/// A local scratch directory holding a tree extracted from a unit.
///
/// The directory and its contents are removed on drop.
#[derive(Debug)]
pub struct ScratchTree {
    dir: TempDir,
}

impl ScratchTree {
    /// Unpack a tar archive into a fresh scratch directory.
    pub fn unpack(archive: &[u8]) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        tar::Archive::new(archive).unpack(dir.path())?;
        Ok(Self { dir })
    }

    /// Root of the scratch directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Copy `container_dir` out of a unit into a scratch directory.
///
/// The archive is buffered to completion before it is unpacked. The
/// extracted tree lives at `<scratch>/<base name of container_dir>`.
pub async fn extract_directory(
    runtime: &dyn ContainerRuntime,
    unit: &UnitHandle,
    container_dir: &str,
) -> Result<ScratchTree> {
    let archive = runtime.copy_out(unit, container_dir).await?;
    let scratch = ScratchTree::unpack(&archive)?;
    debug!(
        unit = %unit,
        container = container_dir,
        local = %scratch.path().display(),
        bytes = archive.len(),
        "copied directory out of unit"
    );
    Ok(scratch)
}

/// Differences between two directory trees, as paths relative to their roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// Entries only present in the left tree.
    pub left_only: Vec<PathBuf>,
    /// Entries only present in the right tree.
    pub right_only: Vec<PathBuf>,
    /// Entries that are neither a regular file nor a directory on both
    /// sides, or a file on one side and a directory on the other.
    pub funny: Vec<PathBuf>,
    /// Files present on both sides with different contents.
    pub mismatch: Vec<PathBuf>,
    /// Files that could not be read for comparison.
    pub errors: Vec<PathBuf>,
}

impl TreeDiff {
    /// Whether the trees are equal.
    pub fn is_empty(&self) -> bool {
        self.left_only.is_empty()
            && self.right_only.is_empty()
            && self.funny.is_empty()
            && self.mismatch.is_empty()
            && self.errors.is_empty()
    }

    fn log(&self) {
        error!("left only: {:?}", self.left_only);
        error!("right only: {:?}", self.right_only);
        error!("funny files: {:?}", self.funny);
        error!("mismatch: {:?}", self.mismatch);
        error!("errors: {:?}", self.errors);
    }
}

impl fmt::Display for TreeDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sections = [
            ("left only", &self.left_only),
            ("right only", &self.right_only),
            ("funny", &self.funny),
            ("mismatch", &self.mismatch),
            ("errors", &self.errors),
        ];
        let mut first = true;
        for (label, paths) in sections {
            if paths.is_empty() {
                continue;
            }
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}: {:?}", label, paths)?;
        }
        if first {
            f.write_str("no differences")?;
        }
        Ok(())
    }
}

/// Recursively compare two directory trees.
///
/// Entry sets must match exactly in both directions, common files must be
/// byte-identical, and common subdirectories must be equal by the same
/// rule. Symlinks are followed.
pub fn compare_trees(left: &Path, right: &Path) -> Result<TreeDiff> {
    let mut diff = TreeDiff::default();
    compare_level(left, right, Path::new(""), &mut diff)?;
    Ok(diff)
}

/// Compare two trees and log every difference. Returns whether they are equal.
pub fn are_dir_trees_equal(left: &Path, right: &Path) -> bool {
    match compare_trees(left, right) {
        Ok(diff) if diff.is_empty() => true,
        Ok(diff) => {
            diff.log();
            false
        }
        Err(e) => {
            error!(
                left = %left.display(),
                right = %right.display(),
                "could not compare trees: {}",
                e
            );
            false
        }
    }
}

fn entry_names(dir: &Path) -> Result<BTreeSet<OsString>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        names.insert(entry?.file_name());
    }
    Ok(names)
}

fn compare_level(left: &Path, right: &Path, relative: &Path, diff: &mut TreeDiff) -> Result<()> {
    let left_names = entry_names(left)?;
    let right_names = entry_names(right)?;

    diff.left_only.extend(
        left_names
            .difference(&right_names)
            .map(|name| relative.join(name)),
    );
    diff.right_only.extend(
        right_names
            .difference(&left_names)
            .map(|name| relative.join(name)),
    );

    let mut common_dirs = Vec::new();
    for name in left_names.intersection(&right_names) {
        let rel = relative.join(name);
        let (l, r) = (left.join(name), right.join(name));
        match (fs::metadata(&l), fs::metadata(&r)) {
            (Ok(lm), Ok(rm)) if lm.is_dir() && rm.is_dir() => common_dirs.push(name.clone()),
            (Ok(lm), Ok(rm)) if lm.is_file() && rm.is_file() => {
                if lm.len() != rm.len() {
                    diff.mismatch.push(rel);
                    continue;
                }
                match files_identical(&l, &r) {
                    Ok(true) => {}
                    Ok(false) => diff.mismatch.push(rel),
                    Err(_) => diff.errors.push(rel),
                }
            }
            _ => diff.funny.push(rel),
        }
    }

    for name in common_dirs {
        let (l, r) = (left.join(&name), right.join(&name));
        info!(left = %l.display(), right = %r.display(), "comparing subdirectories");
        compare_level(&l, &r, &relative.join(&name), diff)?;
    }
    Ok(())
}

fn files_identical(left: &Path, right: &Path) -> io::Result<bool> {
    const CHUNK: usize = 64 * 1024;
    let mut lf = File::open(left)?;
    let mut rf = File::open(right)?;
    let mut lbuf = vec![0u8; CHUNK];
    let mut rbuf = vec![0u8; CHUNK];

    loop {
        let ln = read_full(&mut lf, &mut lbuf)?;
        let rn = read_full(&mut rf, &mut rbuf)?;
        if ln != rn || lbuf[..ln] != rbuf[..rn] {
            return Ok(false);
        }
        if ln == 0 {
            return Ok(true);
        }
    }
}

fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockCall, MockRuntime};

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn sample_tree(root: &Path) {
        write(root, "a.txt", b"alpha");
        write(root, "nested/b.bin", &[0u8, 1, 2, 3, 255]);
        write(root, "nested/deeper/c.txt", b"gamma");
        fs::create_dir_all(root.join("empty")).unwrap();
    }

    #[test]
    fn identical_trees_are_equal() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        sample_tree(left.path());
        sample_tree(right.path());

        assert!(compare_trees(left.path(), right.path()).unwrap().is_empty());
        assert!(are_dir_trees_equal(left.path(), right.path()));
    }

    #[test]
    fn single_byte_difference_names_the_file() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        sample_tree(left.path());
        sample_tree(right.path());
        write(right.path(), "nested/deeper/c.txt", b"gammb");

        let diff = compare_trees(left.path(), right.path()).unwrap();
        assert_eq!(diff.mismatch, vec![PathBuf::from("nested/deeper/c.txt")]);
        assert!(diff.left_only.is_empty() && diff.right_only.is_empty());
        assert!(!are_dir_trees_equal(left.path(), right.path()));
    }

    #[test]
    fn extra_file_is_listed_on_its_side() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        sample_tree(left.path());
        sample_tree(right.path());
        write(right.path(), "nested/extra.txt", b"surplus");

        let diff = compare_trees(left.path(), right.path()).unwrap();
        assert_eq!(diff.right_only, vec![PathBuf::from("nested/extra.txt")]);
        assert!(diff.left_only.is_empty());

        let reversed = compare_trees(right.path(), left.path()).unwrap();
        assert_eq!(reversed.left_only, vec![PathBuf::from("nested/extra.txt")]);
        assert!(reversed.right_only.is_empty());
    }

    #[test]
    fn file_versus_directory_is_funny() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        write(left.path(), "thing", b"file");
        fs::create_dir_all(right.path().join("thing")).unwrap();

        let diff = compare_trees(left.path(), right.path()).unwrap();
        assert_eq!(diff.funny, vec![PathBuf::from("thing")]);
    }

    #[test]
    fn same_size_different_content_is_mismatch() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        let mut big = vec![7u8; 200 * 1024];
        write(left.path(), "big.bin", &big);
        big[150 * 1024] = 8;
        write(right.path(), "big.bin", &big);

        let diff = compare_trees(left.path(), right.path()).unwrap();
        assert_eq!(diff.mismatch, vec![PathBuf::from("big.bin")]);
    }

    #[test]
    fn archive_round_trip_is_identity() {
        let parent = tempfile::tempdir().unwrap();
        let source = parent.path().join("redbackup-test-data");
        sample_tree(&source);

        let archive = archive_directory(&source).unwrap();
        let scratch = ScratchTree::unpack(&archive).unwrap();

        assert!(are_dir_trees_equal(
            &source,
            &scratch.path().join("redbackup-test-data")
        ));
    }

    #[test]
    fn scratch_tree_is_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let source = parent.path().join("payload");
        sample_tree(&source);

        let scratch = ScratchTree::unpack(&archive_directory(&source).unwrap()).unwrap();
        let path = scratch.path().to_path_buf();
        assert!(path.join("payload/a.txt").exists());

        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn diff_display_lists_only_non_empty_sections() {
        let diff = TreeDiff {
            right_only: vec![PathBuf::from("x")],
            mismatch: vec![PathBuf::from("y")],
            ..Default::default()
        };
        assert_eq!(diff.to_string(), "right only: [\"x\"]; mismatch: [\"y\"]");
        assert_eq!(TreeDiff::default().to_string(), "no differences");
    }

    #[tokio::test]
    async fn inject_then_extract_round_trips_through_runtime() {
        let parent = tempfile::tempdir().unwrap();
        let source = parent.path().join("redbackup-test-data");
        sample_tree(&source);

        let runtime = MockRuntime::new();
        let unit = UnitHandle::new("client1");
        inject_directory(&runtime, &unit, &source, "/").await.unwrap();

        // hand the uploaded archive back as if the unit never touched it
        let uploaded = runtime.copied_in("client1").unwrap();
        runtime.set_archive("client1", "/redbackup-test-data", uploaded);

        let scratch = extract_directory(&runtime, &unit, "/redbackup-test-data")
            .await
            .unwrap();
        assert!(are_dir_trees_equal(
            &source,
            &scratch.path().join("redbackup-test-data")
        ));
        assert_eq!(
            runtime.calls(),
            vec![
                MockCall::CopyIn("client1".into(), "/".into()),
                MockCall::CopyOut("client1".into(), "/redbackup-test-data".into()),
            ]
        );
    }
}
