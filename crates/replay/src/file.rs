//! The append-only file replay cache.
//!
//! On-disk format: one record per line, `digest proto src_ip src_port
//! dst_ip dst_port created_unix`, blank and `#`-prefixed lines ignored. A
//! fresh digest is appended and fsynced before `check_and_record` returns
//! `Ok`, so a crash between accept and the next capture read never loses
//! the durability guarantee; a crash mid-write instead leaves a truncated
//! trailing line, which the next load skips (see [`FileStore::load_or_create`]).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use core::digest::Digest;
use core::proto::Protocol;

use crate::{ReplayContext, ReplayEntry, ReplayError, ReplayStore, Verdict};

const HEADER: &str = "# digest proto src_ip src_port dst_ip dst_port created_unix\n";

/// An append-only, file-backed [`ReplayStore`].
pub struct FileStore {
    path: PathBuf,
    file: File,
    entries: HashMap<String, ReplayEntry>,
}

impl FileStore {
    /// Loads an existing cache file into memory, or creates an empty one
    /// with a comment header if it does not exist.
    ///
    /// Malformed lines are skipped rather than failing the load (a crash
    /// mid-append can leave one truncated trailing line); each skip is
    /// logged at `tracing::debug!` naming the 1-indexed line number, so the
    /// condition is visible at `-v` without refusing to start.
    pub fn load_or_create(path: &Path) -> Result<Self, ReplayError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ReplayError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }

        if !path.exists() {
            fs::write(path, HEADER).map_err(|source| ReplayError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }

        let read_handle = File::open(path).map_err(|source| ReplayError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut entries = HashMap::new();
        for (idx, line) in BufReader::new(read_handle).lines().enumerate() {
            let line = line.map_err(|source| ReplayError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match parse_line(trimmed) {
                Some((digest_hex, entry)) => {
                    entries.insert(digest_hex, entry);
                }
                None => {
                    tracing::debug!(line = idx + 1, path = %path.display(), "skipping malformed replay cache line");
                }
            }
        }

        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|source| ReplayError::Io {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
        })
    }
}

impl ReplayStore for FileStore {
    fn check_and_record(
        &mut self,
        digest: &Digest,
        context: ReplayContext,
        now: u64,
    ) -> Result<Verdict, ReplayError> {
        let key = digest.to_hex();
        if let Some(existing) = self.entries.get_mut(&key) {
            existing.replay_count += 1;
            existing.first_replay.get_or_insert(now);
            existing.last_replay = Some(now);
            return Ok(Verdict::Replay(existing.clone()));
        }

        let line = format!(
            "{key} {} {} {} {} {} {now}\n",
            context.proto, context.src_ip, context.src_port, context.dst_ip, context.dst_port
        );
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.sync_data())
            .map_err(|source| ReplayError::Io {
                path: self.path.display().to_string(),
                source,
            })?;

        self.entries.insert(
            key,
            ReplayEntry {
                context,
                created: now,
                first_replay: None,
                last_replay: None,
                replay_count: 0,
            },
        );
        Ok(Verdict::Fresh)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn rotate(&mut self) -> Result<(), ReplayError> {
        let rotated = rotated_path(&self.path);
        fs::rename(&self.path, &rotated).map_err(|source| ReplayError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let fresh = Self::load_or_create(&self.path)?;
        *self = fresh;
        Ok(())
    }
}

/// Returns the `<path>-old` rotation target name for a cache file.
#[must_use]
pub fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push("-old");
    path.with_file_name(name)
}

fn parse_line(line: &str) -> Option<(String, ReplayEntry)> {
    let mut fields = line.split_whitespace();
    let digest_hex = fields.next()?.to_string();
    let proto: Protocol = fields.next()?.parse().ok()?;
    let src_ip = fields.next()?.parse().ok()?;
    let src_port: u16 = fields.next()?.parse().ok()?;
    let dst_ip = fields.next()?.parse().ok()?;
    let dst_port: u16 = fields.next()?.parse().ok()?;
    let created: u64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    if digest_hex.is_empty() || digest_hex.len() % 2 != 0 {
        return None;
    }

    Some((
        digest_hex,
        ReplayEntry {
            context: ReplayContext {
                proto,
                src_ip,
                src_port,
                dst_ip,
                dst_port,
            },
            created,
            first_replay: None,
            last_replay: None,
            replay_count: 0,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::digest::Digest;
    use std::net::IpAddr;

    fn ctx() -> ReplayContext {
        ReplayContext {
            proto: Protocol::Udp,
            src_ip: "203.0.113.9".parse::<IpAddr>().unwrap(),
            src_port: 62201,
            dst_ip: "198.51.100.1".parse::<IpAddr>().unwrap(),
            dst_port: 62201,
        }
    }

    #[test]
    fn missing_file_is_created_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.cache");
        let store = FileStore::load_or_create(&path).unwrap();
        assert_eq!(store.len(), 0);
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with('#'));
    }

    #[test]
    fn written_record_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.cache");
        let digest = Digest::new(vec![0x11; 20]).unwrap();
        {
            let mut store = FileStore::load_or_create(&path).unwrap();
            store.check_and_record(&digest, ctx(), 1_700_000_000).unwrap();
        }
        let mut reloaded = FileStore::load_or_create(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        let verdict = reloaded.check_and_record(&digest, ctx(), 1_700_000_100).unwrap();
        match verdict {
            Verdict::Replay(entry) => assert_eq!(entry.created, 1_700_000_000),
            Verdict::Fresh => panic!("digest written before restart must be REPLAY after"),
        }
    }

    #[test]
    fn malformed_trailing_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.cache");
        fs::write(&path, format!("{HEADER}deadbeef udp 10.0.0.1 1 10.0.0.2 2 1700000000\ntruncated-garb")).unwrap();
        let store = FileStore::load_or_create(&path).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.cache");
        fs::write(&path, "\n# just a comment\n\n").unwrap();
        let store = FileStore::load_or_create(&path).unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn rotate_renames_file_and_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.cache");
        let digest = Digest::new(vec![0x22; 16]).unwrap();
        let mut store = FileStore::load_or_create(&path).unwrap();
        store.check_and_record(&digest, ctx(), 1_700_000_000).unwrap();

        store.rotate().unwrap();
        assert_eq!(store.len(), 0);
        assert!(rotated_path(&path).exists());

        let verdict = store.check_and_record(&digest, ctx(), 1_700_000_200).unwrap();
        assert_eq!(verdict, Verdict::Fresh);
    }

    #[test]
    fn rotated_path_appends_old_suffix() {
        let path = Path::new("/var/run/spa-authd/digest.cache");
        assert_eq!(
            rotated_path(path),
            Path::new("/var/run/spa-authd/digest.cache-old")
        );
    }
}
