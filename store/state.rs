// This file is part of mp3vault, a continuously-recorded MP3 archive.
// Copyright (C) 2026 The mp3vault Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later WITH GPL-3.0-linking-exception

//! Directory state: the cached, ordered list of segments a store believes
//! are currently on disk, and the scan that (re)builds it.

use std::path::Path;
use std::time::{Duration, SystemTime};

use base::clock::unix_secs;
use base::{format_err_t, Error, ErrorKind, ResultExt};

use crate::segment::{self, Segment, CURRENT_FILENAME};

/// How long a cached [`DirectoryState`] is trusted before [`refresh`]
/// rescans the directory.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct DirectoryState {
    /// Oldest first; the live segment, if present, is always last.
    pub segments: Vec<Segment>,
    pub total_size: u64,
    pub next_refresh_at: Option<SystemTime>,
}

impl DirectoryState {
    /// Scans `root` unconditionally and returns a freshly built state.
    /// This is the `load()` form from the design: it never consults or
    /// updates a refresh throttle.
    pub fn load(root: &Path) -> Result<DirectoryState, Error> {
        let mut segments = Vec::new();
        let mut total_size = 0u64;
        let entries = std::fs::read_dir(root)
            .err_kind(ErrorKind::Unknown)
            .map_err(|e| format_err_t_ctx(e, "reading directory"))?;
        for entry in entries {
            let entry = entry.err_kind(ErrorKind::Unknown)?;
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue, // non-UTF8 names are foreign, ignore.
            };
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue, // raced with a concurrent unlink; ignore.
            };
            if !metadata.is_file() {
                continue;
            }
            let size = metadata.len();
            if name == CURRENT_FILENAME {
                let end_ts = unix_secs(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH));
                segments.push(Segment {
                    filename: name.to_string(),
                    end_ts,
                    size,
                });
            } else if let Some(end_ts) = segment::parse_finished_filename(name) {
                segments.push(Segment {
                    filename: name.to_string(),
                    end_ts,
                    size,
                });
            } else {
                continue; // unrecognized entry, ignored per the layout spec.
            }
            total_size += size;
        }
        segments.sort_by(|a, b| {
            if a.is_live() {
                std::cmp::Ordering::Greater
            } else if b.is_live() {
                std::cmp::Ordering::Less
            } else {
                a.end_ts.cmp(&b.end_ts)
            }
        });
        Ok(DirectoryState {
            segments,
            total_size,
            next_refresh_at: None,
        })
    }

    /// If `now` is before the cached `next_refresh_at`, does nothing.
    /// Otherwise rescans `root` and replaces `self` with the fresh state,
    /// preserving only the new `next_refresh_at` deadline.
    pub fn refresh(&mut self, root: &Path, now: SystemTime) -> Result<(), Error> {
        if let Some(next) = self.next_refresh_at {
            if now < next {
                return Ok(());
            }
        }
        let fresh = DirectoryState::load(root)?;
        self.segments = fresh.segments;
        self.total_size = fresh.total_size;
        self.next_refresh_at = Some(now + REFRESH_INTERVAL);
        Ok(())
    }
}

fn format_err_t_ctx(e: Error, ctx: &str) -> Error {
    format_err_t!(Unknown, "{}: {}", ctx, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;

    #[test]
    fn load_sorts_and_sizes() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("t20.mp3"))
            .unwrap()
            .write_all(&[0u8; 5])
            .unwrap();
        File::create(dir.path().join("t10.mp3"))
            .unwrap()
            .write_all(&[0u8; 3])
            .unwrap();
        File::create(dir.path().join(CURRENT_FILENAME))
            .unwrap()
            .write_all(&[0u8; 2])
            .unwrap();
        File::create(dir.path().join("ignored.txt")).unwrap();

        let state = DirectoryState::load(dir.path()).unwrap();
        let names: Vec<&str> = state.segments.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, vec!["t10.mp3", "t20.mp3", CURRENT_FILENAME]);
        assert_eq!(state.total_size, 10);
    }

    #[test]
    fn refresh_is_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = DirectoryState::default();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
        state.refresh(dir.path(), t0).unwrap();
        let next = state.next_refresh_at.unwrap();

        File::create(dir.path().join("t1.mp3")).unwrap();
        // Still within the throttle window: no rescan happens.
        state.refresh(dir.path(), t0 + Duration::from_secs(1)).unwrap();
        assert!(state.segments.is_empty());

        // Past the deadline: rescans and sees the new file.
        state.refresh(dir.path(), next).unwrap();
        assert_eq!(state.segments.len(), 1);
    }
}
