//! Backup payload generation.

use std::fs::{self, File};
use std::io::{self, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use rand::{Rng, RngCore};
use tracing::{debug, info};

use crate::error::Result;

/// Name of the directory scenarios back up and restore.
pub const TEST_DATA_DIR: &str = "redbackup-test-data";

/// Bytes per MiB.
pub const MIB: u64 = 1024 * 1024;

const WRITE_CHUNK: usize = 64 * 1024;

/// Write `file_1..file_<count>` into `dir`, each with a random size drawn
/// from `size_range` (bytes) and random content. Existing files with those
/// names are overwritten.
///
/// Returns the total number of bytes written.
pub fn generate_random_files(
    dir: &Path,
    count: usize,
    size_range: RangeInclusive<u64>,
) -> Result<u64> {
    if size_range.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("empty file size range {:?}", size_range),
        )
        .into());
    }
    let mut rng = rand::thread_rng();
    let mut total = 0;
    for idx in 1..=count {
        let name = format!("file_{}", idx);
        let size = rng.gen_range(size_range.clone());
        write_random_file(&mut rng, &dir.join(&name), size)?;
        info!(file = %name, bytes = size, "generated random file");
        total += size;
    }
    Ok(total)
}

/// Create a small tree under `parent/redbackup-test-data` and return its path.
///
/// The tree holds three files, one of them in a subdirectory. Nodes
/// replicate five chunks per round, so a tree this small is fully
/// replicated after one round.
pub fn generate_test_tree(parent: &Path) -> Result<PathBuf> {
    let root = parent.join(TEST_DATA_DIR);
    let nested = root.join("nested");
    fs::create_dir_all(&nested)?;

    let mut rng = rand::thread_rng();
    for path in [root.join("file_1"), root.join("file_2"), nested.join("file_3")] {
        let size = rng.gen_range(1..=16 * 1024);
        write_random_file(&mut rng, &path, size)?;
    }
    debug!(path = %root.display(), "generated test tree");
    Ok(root)
}

fn write_random_file(rng: &mut impl RngCore, path: &Path, size: u64) -> Result<()> {
    let mut file = File::create(path)?;
    let mut buf = vec![0u8; WRITE_CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(WRITE_CHUNK as u64) as usize;
        rng.fill_bytes(&mut buf[..n]);
        file.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_files_have_sizes_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let total = generate_random_files(dir.path(), 4, 100..=5000).unwrap();

        let mut sum = 0;
        for idx in 1..=4 {
            let len = fs::metadata(dir.path().join(format!("file_{}", idx)))
                .unwrap()
                .len();
            assert!((100..=5000).contains(&len));
            sum += len;
        }
        assert_eq!(sum, total);
        assert!(!dir.path().join("file_5").exists());
    }

    #[test]
    fn exact_size_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let size = WRITE_CHUNK as u64 * 2 + 17;
        assert_eq!(generate_random_files(dir.path(), 1, size..=size).unwrap(), size);
        assert_eq!(fs::metadata(dir.path().join("file_1")).unwrap().len(), size);
    }

    #[test]
    fn zero_files_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(generate_random_files(dir.path(), 0, 1..=MIB).unwrap(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn empty_size_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        #[allow(clippy::reversed_empty_ranges)]
        let range = 10..=1;
        assert!(generate_random_files(dir.path(), 1, range).is_err());
    }

    #[test]
    fn test_tree_layout() {
        let parent = tempfile::tempdir().unwrap();
        let root = generate_test_tree(parent.path()).unwrap();

        assert_eq!(root, parent.path().join(TEST_DATA_DIR));
        assert!(root.join("file_1").is_file());
        assert!(root.join("file_2").is_file());
        assert!(root.join("nested/file_3").is_file());
    }
}
