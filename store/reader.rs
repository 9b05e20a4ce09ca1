// This file is part of mp3vault, a continuously-recorded MP3 archive.
// Copyright (C) 2026 The mp3vault Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later WITH GPL-3.0-linking-exception

//! Streaming a resolved interval back out as bytes.
//!
//! A [`Reader`] is built under the store's lock (see
//! [`crate::facade::Store::reader_at`]) from an immutable snapshot of the
//! segments it will read. Everything after construction — `read`, `seek`,
//! `close` — operates purely on that snapshot and touches no shared state,
//! with one exception: if the live segment gets renamed out from under a
//! read, the reader re-resolves it (see `reopen_after_rename`).

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek as _, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use base::{format_err_t, Error, ErrorKind, ResultExt};
use parking_lot::Mutex;

use crate::facade::StoreState;
use crate::segment::Segment;
use crate::state::DirectoryState;

/// A lazily-evaluated byte stream over one or more segment files.
pub struct Reader {
    root: PathBuf,
    store: Arc<Mutex<StoreState>>,

    /// Remaining segments to read, oldest first.
    segments: VecDeque<Segment>,

    /// Bytes still to skip within `segments[0]` before the first byte this
    /// reader should yield. Consumed once, on the first read.
    leading_skip: u64,

    /// `leading_skip`, preserved so a pre-read seek can be computed relative
    /// to the start of the served interval rather than the segment.
    size: u64,
    name: String,
    modtime: i64,

    /// Within-segment byte offset to apply when the next file is opened.
    /// Starts as `leading_skip`; a pre-read seek adds to it.
    pending_offset: u64,

    current: Option<std::io::Take<File>>,
    started: bool,
    closed: bool,
}

impl Reader {
    pub(crate) fn new(
        root: PathBuf,
        store: Arc<Mutex<StoreState>>,
        segments: Vec<Segment>,
        leading_skip: u64,
        name: String,
        modtime: i64,
    ) -> Reader {
        let size = segments.iter().map(|s| s.size).sum::<u64>().saturating_sub(leading_skip);
        Reader {
            root,
            store,
            segments: segments.into(),
            leading_skip,
            size,
            name,
            modtime,
            pending_offset: leading_skip,
            current: None,
            started: false,
            closed: false,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modtime(&self) -> i64 {
        self.modtime
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Seeks before the first read. `whence` follows [`SeekFrom`]'s
    /// start/current/end semantics, relative to [`Reader::size`]. Returns
    /// an error if called after reading has begun.
    pub fn seek(&mut self, whence: SeekFrom) -> Result<u64, Error> {
        if self.started {
            return Err(format_err_t!(
                InvalidArgument,
                "seek not supported once reading has begun"
            ));
        }
        let cur = self.pending_offset - self.leading_skip;
        let new = match whence {
            SeekFrom::Start(off) => off as i64,
            SeekFrom::Current(off) => cur as i64 + off,
            SeekFrom::End(off) => self.size as i64 + off,
        };
        if new < 0 || new as u64 > self.size {
            return Err(format_err_t!(InvalidArgument, "seek out of range: {}", new));
        }
        self.pending_offset = self.leading_skip + new as u64;
        Ok(new as u64)
    }

    /// Closes any currently-open file. Idempotent.
    pub fn close(&mut self) -> Result<(), Error> {
        self.current = None;
        self.closed = true;
        Ok(())
    }

    /// Opens the next segment in `self.segments`, consuming `offset` bytes
    /// of within-segment skip along the way (a segment entirely before the
    /// remaining offset is skipped over without being opened).
    fn open_next(&mut self) -> Result<bool, Error> {
        loop {
            let seg = match self.segments.pop_front() {
                Some(s) => s,
                None => return Ok(false),
            };
            if self.pending_offset >= seg.size {
                self.pending_offset -= seg.size;
                continue;
            }
            let offset = self.pending_offset;
            self.pending_offset = 0;
            let file = self.open_segment_file(&seg, offset)?;
            self.current = Some(file.take(seg.size - offset));
            return Ok(true);
        }
    }

    fn open_segment_file(&self, seg: &Segment, offset: u64) -> Result<File, Error> {
        let path = self.root.join(&seg.filename);
        match File::open(&path) {
            Ok(mut f) => {
                if offset > 0 {
                    f.seek(SeekFrom::Start(offset)).err_kind(ErrorKind::Unknown)?;
                }
                Ok(f)
            }
            Err(open_err) if seg.is_live() => {
                // The writer may have rotated current.mp3 to its finished
                // name between resolution and open. Re-resolve it rather
                // than surfacing a spurious not-found.
                match self.reopen_after_rename(seg)? {
                    Some(mut f) => {
                        if offset > 0 {
                            f.seek(SeekFrom::Start(offset)).err_kind(ErrorKind::Unknown)?;
                        }
                        Ok(f)
                    }
                    None => Err(open_err).err_kind(ErrorKind::Unknown),
                }
            }
            Err(e) => Err(e).err_kind(ErrorKind::Unknown),
        }
    }

    /// Re-acquires the store's lock and rescans the directory, looking for
    /// the oldest segment whose `end_ts >= seg.end_ts`. If its filename
    /// differs from `seg.filename`, `current.mp3` was renamed out from
    /// under us; open that file instead.
    fn reopen_after_rename(&self, seg: &Segment) -> Result<Option<File>, Error> {
        let _guard = self.store.lock();
        let fresh = DirectoryState::load(&self.root)?;
        let replacement = fresh.segments.iter().find(|s| s.end_ts >= seg.end_ts);
        match replacement {
            Some(r) if r.filename != seg.filename => {
                File::open(self.root.join(&r.filename))
                    .err_kind(ErrorKind::Unknown)
                    .map(Some)
            }
            _ => Ok(None),
        }
    }
}

impl Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.started = true;
        loop {
            if self.current.is_none() {
                let opened = self
                    .open_next()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.compat()))?;
                if !opened {
                    return Ok(0);
                }
            }
            let n = self.current.as_mut().unwrap().read(buf)?;
            if n == 0 {
                self.current = None;
                continue;
            }
            return Ok(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::{Store, StoreConfig};
    use crate::segment::CURRENT_FILENAME;
    use std::io::{Read as _, Write as _};
    use std::time::{Duration, UNIX_EPOCH};

    fn state() -> Arc<Mutex<StoreState>> {
        Arc::new(Mutex::new(StoreState::default()))
    }

    #[test]
    fn reads_across_segment_boundary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t10.mp3"), b"hello").unwrap();
        std::fs::write(dir.path().join("t20.mp3"), b"world").unwrap();
        let segs = vec![
            Segment { filename: "t10.mp3".into(), end_ts: 10, size: 5 },
            Segment { filename: "t20.mp3".into(), end_ts: 20, size: 5 },
        ];
        let mut r = Reader::new(dir.path().to_owned(), state(), segs, 2, "x".into(), 20);
        assert_eq!(r.size(), 8);
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"lloworld");
    }

    #[test]
    fn double_close_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t10.mp3"), b"hello").unwrap();
        let segs = vec![Segment { filename: "t10.mp3".into(), end_ts: 10, size: 5 }];
        let mut r = Reader::new(dir.path().to_owned(), state(), segs, 0, "x".into(), 10);
        r.close().unwrap();
        r.close().unwrap();
    }

    #[test]
    fn seek_after_read_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t10.mp3"), b"hello").unwrap();
        let segs = vec![Segment { filename: "t10.mp3".into(), end_ts: 10, size: 5 }];
        let mut r = Reader::new(dir.path().to_owned(), state(), segs, 0, "x".into(), 10);
        let mut buf = [0u8; 1];
        r.read(&mut buf).unwrap();
        assert!(r.seek(SeekFrom::Start(0)).is_err());
    }

    #[test]
    fn rename_race_is_resolved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CURRENT_FILENAME), b"live-bytes").unwrap();
        let segs = vec![Segment {
            filename: CURRENT_FILENAME.into(),
            end_ts: 100,
            size: 10,
        }];
        let mut r = Reader::new(dir.path().to_owned(), state(), segs, 0, "x".into(), 100);
        // Simulate the writer rotating current.mp3 away before the first read.
        std::fs::rename(
            dir.path().join(CURRENT_FILENAME),
            dir.path().join("t100.mp3"),
        )
        .unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"live-bytes");
    }

    /// A real 64 kbps MPEG1 Layer III frame header, repeated to fill a
    /// segment's worth of silent audio.
    const FRAME: [u8; 12] = [
        0xff, 0xfb, 0x54, 0xc4, 0x00, 0x03, 0xc0, 0x00, 0x01, 0xa4, 0x00, 0x00,
    ];

    #[test]
    fn frame_boundary_resync_across_segments() {
        const BITRATE: u32 = 64_000;
        const SEGMENT_SECS: i64 = 10;
        let bytes_per_segment = (BITRATE as u64) * (SEGMENT_SECS as u64) / 8;

        let dir = tempfile::tempdir().unwrap();
        let silence_start: i64 = 1_234_567_890;
        for j in 1..=4i64 {
            let end_ts = silence_start + j * SEGMENT_SECS;
            let mut f = std::fs::File::create(dir.path().join(format!("t{}.mp3", end_ts))).unwrap();
            let mut written = 0u64;
            while written < bytes_per_segment {
                f.write_all(&FRAME).unwrap();
                written += FRAME.len() as u64;
            }
        }

        let store = Store::open(StoreConfig {
            root: dir.path().to_owned(),
            bitrate: BITRATE,
            split_on_size: 0,
            split_on_silence: Duration::from_secs(0),
            purge_on_size: 0,
            on_close_error: None,
        })
        .unwrap();

        // Step a 2-second read window across each segment boundary (at
        // 10s, 20s and 30s in), confirming every resolved read starts on a
        // frame sync and, when it spans the splice between two files,
        // finds another sync byte right where the first frame ends.
        for boundary in [1i64, 2, 3].iter().copied() {
            let boundary_ts = silence_start + boundary * SEGMENT_SECS;
            for offset in -2i64..=1 {
                let start = UNIX_EPOCH + Duration::from_secs((boundary_ts + offset) as u64);
                let mut r = store.reader_at(start, Duration::from_secs(2)).unwrap();
                let size = r.size();
                let mut buf = Vec::new();
                r.read_to_end(&mut buf).unwrap();
                assert_eq!(buf.len() as u64, size);
                assert!(buf.len() > FRAME.len());
                assert_eq!(buf[0], FRAME[0]);
                assert_eq!(buf[1], FRAME[1]);
                assert_eq!(buf[FRAME.len()], FRAME[0]);
            }
        }
    }
}
