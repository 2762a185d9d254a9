//! Remote file enumeration and chunking.
//!
//! Builds the full remote file list, normalizes paths relative to the
//! remote root, and splits the list round-robin into one chunk file per
//! worker. Round-robin (rather than contiguous slicing) spreads any
//! clustering of large files in the source listing evenly across workers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::ssh::SshSession;
use crate::utils::errors::{BackupError, Result};

/// Raw enumeration output, one absolute remote path per line.
pub const ALL_FILES_NAME: &str = "all_files.txt";

/// Strip the remote-root prefix (trailing slash tolerated) and any leading
/// slash from an enumerated path. Already-relative paths pass through
/// unchanged; a path equal to the root itself reduces to nothing.
pub fn normalize_path(line: &str, remote_root: &str) -> Option<String> {
    let root = remote_root.trim_end_matches('/');
    match line.strip_prefix(root) {
        Some(rest) => {
            let relative = rest.trim_start_matches('/');
            if relative.is_empty() {
                None
            } else {
                Some(relative.to_string())
            }
        }
        None => Some(line.to_string()),
    }
}

/// Enumerates the remote tree into a local listing file.
pub struct FileListBuilder<'a> {
    session: &'a SshSession,
    remote_root: &'a str,
    tmp_dir: &'a Path,
    timeout: Duration,
}

impl<'a> FileListBuilder<'a> {
    pub fn new(
        session: &'a SshSession,
        remote_root: &'a str,
        tmp_dir: &'a Path,
        timeout: Duration,
    ) -> Self {
        Self {
            session,
            remote_root,
            tmp_dir,
            timeout,
        }
    }

    /// Run the remote enumeration and write its raw output to
    /// `<tmp_dir>/all_files.txt`. A failing enumeration is fatal: it means
    /// a bad path or unreachable host, not something worth retrying.
    pub async fn build(&self) -> Result<PathBuf> {
        let find_cmd = format!("find \"{}\" -type f", self.remote_root);
        let out = self.session.run_with_timeout(&find_cmd, self.timeout).await;

        if !out.success {
            return Err(BackupError::FileList(format!(
                "remote enumeration of {} failed: {}",
                self.remote_root,
                if out.stderr.is_empty() {
                    "unknown error"
                } else {
                    &out.stderr
                }
            )));
        }

        let list_path = self.tmp_dir.join(ALL_FILES_NAME);
        let mut file = tokio::fs::File::create(&list_path).await?;
        file.write_all(out.stdout.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        let count = out.stdout.lines().filter(|l| !l.trim().is_empty()).count();
        info!("Enumerated {} remote files into {}", count, list_path.display());

        Ok(list_path)
    }
}

/// Split the listing into `n` chunk files, assigning processed line `i`
/// to chunk `i mod n`. Always produces exactly `n` files; relative order
/// within each chunk matches the source listing.
pub async fn chunk_file_list(
    list_path: &Path,
    remote_root: &str,
    n: usize,
    tmp_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let content = tokio::fs::read_to_string(list_path).await?;
    let processed: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| normalize_path(l, remote_root))
        .collect();

    let mut chunks: Vec<Vec<&str>> = vec![Vec::new(); n];
    for (idx, line) in processed.iter().enumerate() {
        chunks[idx % n].push(line.as_str());
    }

    let mut paths = Vec::with_capacity(n);
    for (i, lines) in chunks.iter().enumerate() {
        let chunk_path = tmp_dir.join(format!("chunk_{i}.txt"));
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        tokio::fs::write(&chunk_path, body).await?;
        debug!("Chunk {}: {} files", i, lines.len());
        paths.push(chunk_path);
    }

    info!(
        "Split {} files into {} chunks under {}",
        processed.len(),
        n,
        tmp_dir.display()
    );
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_root_prefix() {
        assert_eq!(
            normalize_path("/srv/data/a/b.txt", "/srv/data"),
            Some("a/b.txt".to_string())
        );
    }

    #[test]
    fn test_normalize_tolerates_trailing_slash_on_root() {
        assert_eq!(
            normalize_path("/srv/data/a/b.txt", "/srv/data/"),
            Some("a/b.txt".to_string())
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_path("/srv/data/a/b.txt", "/srv/data").unwrap();
        assert_eq!(normalize_path(&once, "/srv/data"), Some(once.clone()));
    }

    #[test]
    fn test_normalize_passes_through_unmatched_lines() {
        assert_eq!(
            normalize_path("/other/place/f.txt", "/srv/data"),
            Some("/other/place/f.txt".to_string())
        );
    }

    #[test]
    fn test_normalize_drops_bare_root() {
        assert_eq!(normalize_path("/srv/data", "/srv/data"), None);
        assert_eq!(normalize_path("/srv/data/", "/srv/data"), None);
    }

    #[tokio::test]
    async fn test_chunk_round_robin_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("all_files.txt");
        let files: Vec<String> = (0..10).map(|i| format!("/srv/data/f{i}.bin")).collect();
        tokio::fs::write(&list, files.join("\n")).await.unwrap();

        let chunks = chunk_file_list(&list, "/srv/data", 3, dir.path())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 3);

        let read = |p: &PathBuf| {
            std::fs::read_to_string(p)
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        let c0 = read(&chunks[0]);
        let c1 = read(&chunks[1]);
        let c2 = read(&chunks[2]);

        // line k lands in chunk k mod 3
        assert_eq!(c0, vec!["f0.bin", "f3.bin", "f6.bin", "f9.bin"]);
        assert_eq!(c1, vec!["f1.bin", "f4.bin", "f7.bin"]);
        assert_eq!(c2, vec!["f2.bin", "f5.bin", "f8.bin"]);
        assert_eq!(c0.len() + c1.len() + c2.len(), 10);
    }

    #[tokio::test]
    async fn test_chunk_round_trip_reinterleave() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("all_files.txt");
        let files: Vec<String> = (0..23).map(|i| format!("/srv/data/dir/f{i}")).collect();
        tokio::fs::write(&list, files.join("\n")).await.unwrap();

        let n = 4;
        let chunks = chunk_file_list(&list, "/srv/data", n, dir.path())
            .await
            .unwrap();
        let parts: Vec<Vec<String>> = chunks
            .iter()
            .map(|p| {
                std::fs::read_to_string(p)
                    .unwrap()
                    .lines()
                    .map(str::to_string)
                    .collect()
            })
            .collect();

        // re-interleave in round-robin order reconstructs the original list
        let mut rebuilt = Vec::new();
        let max_len = parts.iter().map(Vec::len).max().unwrap();
        for row in 0..max_len {
            for part in &parts {
                if let Some(line) = part.get(row) {
                    rebuilt.push(line.clone());
                }
            }
        }
        let expected: Vec<String> = (0..23).map(|i| format!("dir/f{i}")).collect();
        assert_eq!(rebuilt, expected);
    }

    #[tokio::test]
    async fn test_chunk_skips_blank_lines_and_pads_empty_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("all_files.txt");
        tokio::fs::write(&list, "/srv/data/a\n\n   \n/srv/data/b\n")
            .await
            .unwrap();

        let chunks = chunk_file_list(&list, "/srv/data", 4, dir.path())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 4);
        let total: usize = chunks
            .iter()
            .map(|p| {
                std::fs::read_to_string(p)
                    .unwrap()
                    .lines()
                    .filter(|l| !l.is_empty())
                    .count()
            })
            .sum();
        assert_eq!(total, 2);
        // chunks beyond the file count still exist, just empty
        assert!(std::fs::read_to_string(&chunks[3]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunk_single_worker_gets_everything() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("all_files.txt");
        tokio::fs::write(&list, "/srv/data/a\n/srv/data/b\n/srv/data/c\n")
            .await
            .unwrap();

        let chunks = chunk_file_list(&list, "/srv/data", 1, dir.path())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        let lines: Vec<String> = std::fs::read_to_string(&chunks[0])
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }
}
