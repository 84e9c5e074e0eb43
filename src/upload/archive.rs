//! Archive Entry Stream
//!
//! Every scan re-opens the archive and walks it from the start; there is no
//! offset index, so reaching an entry again means a full linear re-scan.
//! Only regular files with data get an ordinal. Directories, links and
//! zero-size files are skipped and never seen by the ledger.
//!
//! Parsing is blocking and runs on a `spawn_blocking` thread. A claimed
//! entry's bytes are fed through a bounded `EntryBody` channel, so the parser
//! stays parked on that entry until its upload pulls or drops the body.

use super::error::ArchiveError;
use crate::store::{BodySender, EntryBody};
use bytes::BytesMut;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Identity of one non-empty file entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Position among non-empty file entries, from 0
    pub ordinal: u64,
    /// Name as stored in the archive
    pub archive_path: String,
    /// Destination path in the remote store
    pub remote_path: String,
    pub size: u64,
}

/// Entry claimed by a worker, with its suspended body
#[derive(Debug)]
pub struct ClaimedEntry {
    pub header: EntryHeader,
    pub body: EntryBody,
}

/// Counters for one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Non-empty file entries seen
    pub entries: u64,
    /// Zero-size files skipped
    pub empty: u64,
    /// Entries this scan claimed and submitted
    pub claimed: u64,
}

#[derive(Debug, Clone)]
pub struct ArchiveEntryStream {
    path: PathBuf,
    dest: String,
    chunk_size: usize,
    queue_depth: usize,
}

impl ArchiveEntryStream {
    /// Stream over the tar archive at `path`, mapping entries under `dest`
    pub fn open(
        path: impl Into<PathBuf>,
        dest: impl Into<String>,
        chunk_size: usize,
        queue_depth: usize,
    ) -> Result<Self, ArchiveError> {
        let path = path.into();
        let metadata = std::fs::metadata(&path).map_err(|source| ArchiveError::Open {
            path: path.clone(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(ArchiveError::NotAFile(path));
        }

        Ok(ArchiveEntryStream {
            path,
            dest: dest.into(),
            chunk_size: chunk_size.max(1),
            queue_depth: queue_depth.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dest(&self) -> &str {
        &self.dest
    }

    /// Walk the archive once, from the start.
    ///
    /// `claim` decides whether this scan owns an entry. Claimed entries are
    /// passed to `submit` and their bytes pumped into the body before the
    /// scan moves on; unclaimed entries are skipped without reading their
    /// data. Returns early, without error, once `submit` refuses an entry.
    ///
    /// Blocks the calling thread; must not run on an async worker thread.
    pub fn scan<F, S>(&self, mut claim: F, mut submit: S) -> Result<ScanSummary, ArchiveError>
    where
        F: FnMut(&EntryHeader) -> bool,
        S: FnMut(ClaimedEntry) -> bool,
    {
        let file = File::open(&self.path).map_err(|source| ArchiveError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut archive = tar::Archive::new(BufReader::new(file));
        let mut summary = ScanSummary::default();

        for entry in archive.entries().map_err(ArchiveError::Read)? {
            let mut entry = entry.map_err(ArchiveError::Read)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let size = entry.size();
            if size == 0 {
                summary.empty += 1;
                continue;
            }

            let archive_path = entry
                .path()
                .map_err(ArchiveError::Read)?
                .to_string_lossy()
                .into_owned();
            let header = EntryHeader {
                ordinal: summary.entries,
                remote_path: remote_path(&self.dest, &archive_path)?,
                archive_path,
                size,
            };
            summary.entries += 1;

            if !claim(&header) {
                trace!(ordinal = header.ordinal, "entry claimed elsewhere, skipping");
                continue;
            }

            let (sender, body) = EntryBody::channel(size, self.queue_depth);
            if !submit(ClaimedEntry { header, body }) {
                break;
            }
            summary.claimed += 1;
            self.pump(&mut entry, &sender)?;
        }

        Ok(summary)
    }

    /// Feed entry data into the body until it is consumed or dropped
    fn pump<R: Read>(&self, reader: &mut R, sender: &BodySender) -> Result<(), ArchiveError> {
        loop {
            let mut chunk = BytesMut::zeroed(self.chunk_size);
            let n = match reader.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = sender.send_blocking(Err(std::io::Error::new(e.kind(), e.to_string())));
                    return Err(ArchiveError::Read(e));
                }
            };
            chunk.truncate(n);
            if !sender.send_blocking(Ok(chunk.freeze())) {
                // Body dropped: the upload was deferred or abandoned
                return Ok(());
            }
        }
    }
}

/// Destination path for an archive entry: `dest` joined with the entry's
/// normalized relative path. `..` components are rejected.
pub fn remote_path(dest: &str, archive_path: &str) -> Result<String, ArchiveError> {
    let mut out = dest.trim_end_matches('/').to_string();
    let mut parts = 0;

    for component in Path::new(archive_path).components() {
        match component {
            Component::Normal(part) => {
                out.push('/');
                out.push_str(&part.to_string_lossy());
                parts += 1;
            }
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(ArchiveError::InvalidPath(archive_path.to_string()));
            }
        }
    }

    if parts == 0 {
        return Err(ArchiveError::InvalidPath(archive_path.to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn build_archive(files: &[(&str, &[u8])]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        {
            let mut builder = tar::Builder::new(&mut file);
            let mut dir = tar::Header::new_gnu();
            dir.set_entry_type(tar::EntryType::Directory);
            dir.set_size(0);
            dir.set_mode(0o755);
            dir.set_cksum();
            builder.append_data(&mut dir, "dir/", std::io::empty()).unwrap();

            for (path, data) in files {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, path, *data).unwrap();
            }
            builder.finish().unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_remote_path() {
        assert_eq!(remote_path("/dest", "a/b.txt").unwrap(), "/dest/a/b.txt");
        assert_eq!(remote_path("/dest/", "./a/./b.txt").unwrap(), "/dest/a/b.txt");
        assert_eq!(remote_path("/", "top.txt").unwrap(), "/top.txt");
        assert_eq!(remote_path("/dest", "/abs/x").unwrap(), "/dest/abs/x");
        assert!(remote_path("/dest", "../escape").is_err());
        assert!(remote_path("/dest", "a/../../b").is_err());
        assert!(remote_path("/dest", "./").is_err());
    }

    #[test]
    fn test_open_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ArchiveEntryStream::open(dir.path(), "/d", 4096, 4),
            Err(ArchiveError::NotAFile(_))
        ));
        assert!(matches!(
            ArchiveEntryStream::open(dir.path().join("missing.tar"), "/d", 4096, 4),
            Err(ArchiveError::Open { .. })
        ));
    }

    #[test]
    fn test_scan_skips_dirs_and_empty_files() {
        let archive = build_archive(&[
            ("dir/a.txt", &b"alpha"[..]),
            ("dir/empty", &b""[..]),
            ("dir/b.txt", &b"bravo!"[..]),
            ("c.txt", &b"charlie"[..]),
        ]);
        let stream = ArchiveEntryStream::open(archive.path(), "/dest", 4096, 8).unwrap();

        let mut seen = Vec::new();
        let mut claimed = Vec::new();
        let summary = stream
            .scan(
                |h| {
                    seen.push(h.clone());
                    true
                },
                |entry| {
                    claimed.push(entry);
                    true
                },
            )
            .unwrap();

        assert_eq!(summary.entries, 3);
        assert_eq!(summary.empty, 1);
        assert_eq!(summary.claimed, 3);

        let ordinals: Vec<u64> = seen.iter().map(|h| h.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
        let paths: Vec<&str> = seen.iter().map(|h| h.remote_path.as_str()).collect();
        assert_eq!(paths, vec!["/dest/dir/a.txt", "/dest/dir/b.txt", "/dest/c.txt"]);

        let bodies: Vec<Vec<u8>> = claimed
            .into_iter()
            .map(|mut e| block_on(e.body.read_to_end()).unwrap().to_vec())
            .collect();
        assert_eq!(
            bodies,
            vec![b"alpha".to_vec(), b"bravo!".to_vec(), b"charlie".to_vec()]
        );
    }

    #[test]
    fn test_unclaimed_entries_are_not_submitted() {
        let archive = build_archive(&[("a", &b"1"[..]), ("b", &b"22"[..]), ("c", &b"333"[..])]);
        let stream = ArchiveEntryStream::open(archive.path(), "/d", 4096, 4).unwrap();

        let mut claimed = Vec::new();
        let summary = stream
            .scan(|h| h.ordinal == 1, |entry| {
                claimed.push(entry);
                true
            })
            .unwrap();

        assert_eq!(summary.entries, 3);
        assert_eq!(summary.claimed, 1);
        assert_eq!(claimed[0].header.remote_path, "/d/b");
        assert_eq!(block_on(claimed[0].body.read_to_end()).unwrap().as_ref(), b"22");
    }

    #[test]
    fn test_dropped_body_lets_scan_continue() {
        let big = vec![7u8; 64 * 1024];
        let archive = build_archive(&[("big", big.as_slice()), ("small", &b"tail"[..])]);
        // Queue of one small chunk: the pump blocks unless the body is dropped
        let stream = ArchiveEntryStream::open(archive.path(), "/d", 4096, 1).unwrap();

        let mut kept = Vec::new();
        let summary = stream
            .scan(|_| true, |entry| {
                if entry.header.ordinal == 0 {
                    drop(entry);
                } else {
                    kept.push(entry);
                }
                true
            })
            .unwrap();

        assert_eq!(summary.claimed, 2);
        assert_eq!(block_on(kept[0].body.read_to_end()).unwrap().as_ref(), b"tail");
    }

    #[test]
    fn test_refused_submit_stops_scan() {
        let archive = build_archive(&[("a", &b"1"[..]), ("b", &b"2"[..])]);
        let stream = ArchiveEntryStream::open(archive.path(), "/d", 4096, 4).unwrap();

        let summary = stream.scan(|_| true, |_| false).unwrap();
        assert_eq!(summary.claimed, 0);
        assert_eq!(summary.entries, 1);
    }

    #[tokio::test]
    async fn test_large_body_streams_in_chunks() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let archive = build_archive(&[("blob", data.as_slice())]);
        let stream = ArchiveEntryStream::open(archive.path(), "/d", 4096, 2).unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let scan = tokio::task::spawn_blocking(move || {
            stream.scan(|_| true, |entry| tx.blocking_send(entry).is_ok())
        });

        let mut entry = rx.recv().await.unwrap();
        let mut chunks = 0;
        let mut received = Vec::new();
        while let Some(chunk) = entry.body.next_chunk().await {
            received.extend_from_slice(&chunk.unwrap());
            chunks += 1;
        }

        assert_eq!(received, data);
        assert!(chunks > 1);
        assert_eq!(scan.await.unwrap().unwrap().claimed, 1);
    }
}
