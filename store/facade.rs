// This file is part of mp3vault, a continuously-recorded MP3 archive.
// Copyright (C) 2026 The mp3vault Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later WITH GPL-3.0-linking-exception

//! `Store`: the directory façade tying the cached directory state, the
//! frame-sync resolver, the reader and the writer together behind one lock.

use std::fmt;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base::clock::{unix_secs, Clocks, RealClocks};
use base::{format_err_t, Error};
use nix::fcntl::{flock, open, FlockArg, OFlag};
use nix::sys::stat::Mode;
use parking_lot::Mutex;

use crate::framesync;
use crate::manifest::{self, Manifest};
use crate::reader::Reader;
use crate::segment::Segment;
use crate::state::DirectoryState;
use crate::writer::{self, WriterRuntime};

/// Everything a `Store` keeps behind its single mutex: the cached directory
/// listing and, if this store was opened for writing, the writer's runtime
/// state. A [`Reader`] locks the same mutex to serialize its rename-race
/// rescan against an in-flight rotation.
#[derive(Default)]
pub(crate) struct StoreState {
    pub(crate) dir: DirectoryState,
    pub(crate) writer: WriterRuntime,
}

/// Static configuration for a store: where it lives on disk, the nominal
/// bitrate used to convert between durations and byte counts, and the
/// writer's rotation/retention thresholds (ignored by a read-only store).
#[derive(Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub bitrate: u32,
    pub split_on_size: u64,
    pub split_on_silence: Duration,
    pub purge_on_size: u64,
    pub on_close_error: Option<Arc<dyn Fn(Error) + Send + Sync>>,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("root", &self.root)
            .field("bitrate", &self.bitrate)
            .field("split_on_size", &self.split_on_size)
            .field("split_on_silence", &self.split_on_silence)
            .field("purge_on_size", &self.purge_on_size)
            .finish()
    }
}

/// Result of resolving a name via [`Store::open`]: either a byte stream over
/// one interval, or the JSON manifest of everything the store currently
/// holds.
pub enum Opened {
    Stream(Reader),
    Manifest(Manifest),
}

/// A directory on disk holding a continuous MP3 recording, plus (optionally)
/// the ability to append to it.
pub struct Store {
    config: StoreConfig,
    clocks: Arc<dyn Clocks>,
    state: Arc<Mutex<StoreState>>,
    _lock: DirLock,
    writable: bool,
}

impl Store {
    /// Opens `config.root` read-only. Takes a shared flock so a concurrent
    /// writer on the same directory can still be detected as exclusive.
    pub fn open(config: StoreConfig) -> Result<Store, Error> {
        Store::open_with_clocks(config, Arc::new(RealClocks::default()), false)
    }

    /// Opens `config.root` for both reading and writing. Takes an exclusive
    /// flock: a second writer (or reader taking a shared lock while this one
    /// holds exclusive) on the same directory fails immediately rather than
    /// silently corrupting segment bookkeeping.
    pub fn open_for_writing(config: StoreConfig) -> Result<Store, Error> {
        Store::open_with_clocks(config, Arc::new(RealClocks::default()), true)
    }

    pub(crate) fn open_with_clocks(
        config: StoreConfig,
        clocks: Arc<dyn Clocks>,
        writable: bool,
    ) -> Result<Store, Error> {
        let lock = DirLock::acquire(&config.root, writable)?;
        let mut state = StoreState::default();
        state.dir = DirectoryState::load(&config.root)?;
        Ok(Store {
            config,
            clocks,
            state: Arc::new(Mutex::new(state)),
            _lock: lock,
            writable,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Resolves `name` — either `index.json` or `<start_ts>-<end_ts>.mp3` —
    /// to a manifest or a byte stream, refreshing the cached directory
    /// listing first.
    pub fn open_name(&self, name: &str) -> Result<Opened, Error> {
        let trimmed = name.trim_start_matches('/');
        if trimmed == "index.json" {
            let mut guard = self.state.lock();
            guard.dir.refresh(&self.config.root, self.clocks.now())?;
            return Ok(Opened::Manifest(manifest::build(&guard.dir, self.config.bitrate)));
        }
        let body = trimmed
            .strip_suffix(".mp3")
            .ok_or_else(|| format_err_t!(NotFound, "unrecognized name: {}", name))?;
        let (start_s, end_s) = body
            .split_once('-')
            .ok_or_else(|| format_err_t!(NotFound, "unrecognized name: {}", name))?;
        let start_ts: i64 = start_s
            .parse()
            .map_err(|_| format_err_t!(NotFound, "unrecognized name: {}", name))?;
        let end_ts: i64 = end_s
            .parse()
            .map_err(|_| format_err_t!(NotFound, "unrecognized name: {}", name))?;
        if end_ts < start_ts {
            return Err(format_err_t!(NotFound, "end before start in {}", name));
        }
        let start = UNIX_EPOCH + Duration::from_secs(start_ts.max(0) as u64);
        let max = Duration::from_secs((end_ts - start_ts) as u64);
        self.reader_at(start, max).map(Opened::Stream)
    }

    /// Resolves `[start, start+max)` (or `[start, now)` if `max` is zero) to
    /// a byte stream, snapping the beginning to the nearest MP3 frame.
    pub fn reader_at(&self, start: SystemTime, max: Duration) -> Result<Reader, Error> {
        let mut guard = self.state.lock();
        guard.dir.refresh(&self.config.root, self.clocks.now())?;
        let now = self.clocks.now();
        let resolved = resolve(&guard.dir, &self.config, start, max, now)?;
        drop(guard);
        Ok(Reader::new(
            self.config.root.clone(),
            self.state.clone(),
            resolved.segments,
            resolved.leading_skip,
            resolved.name,
            resolved.modtime,
        ))
    }

    /// Appends `buf` to the live segment, rotating and purging as needed.
    /// Returns an error (repeated on every call until [`Store::close_writer`]
    /// is called) if a prior rotation failed partway through.
    pub fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        if !self.writable {
            return Err(format_err_t!(InvalidArgument, "store was not opened for writing"));
        }
        let mut guard = self.state.lock();
        let StoreState { dir, writer: rt } = &mut *guard;
        writer::write(rt, dir, &self.config.root, &self.config, self.clocks.as_ref(), buf)
    }

    /// Closes the writer's currently-open file without rotating. Safe to
    /// call on a store that was never written to.
    pub fn close_writer(&self) -> Result<(), Error> {
        let mut guard = self.state.lock();
        writer::close(&mut guard.writer, &self.config)
    }
}

struct ResolvedInterval {
    segments: Vec<Segment>,
    leading_skip: u64,
    name: String,
    modtime: i64,
}

/// Implements the interval-to-segment resolver: picks the segments
/// overlapping `[start, end)`, computes how many bytes of the first
/// segment to skip and how much of the last to trim, then snaps the
/// leading skip forward to the next MP3 frame boundary.
fn resolve(
    state: &DirectoryState,
    cfg: &StoreConfig,
    start: SystemTime,
    max: Duration,
    now: SystemTime,
) -> Result<ResolvedInterval, Error> {
    let start_ts = unix_secs(start);
    let end_ts = if max.is_zero() {
        unix_secs(now)
    } else {
        unix_secs(start + max)
    };
    if end_ts < start_ts {
        return Err(format_err_t!(InvalidArgument, "end before start"));
    }

    let mut want: Vec<Segment> = Vec::new();
    for seg in &state.segments {
        if seg.size == 0 || seg.end_ts <= start_ts {
            continue;
        }
        want.push(seg.clone());
        if seg.end_ts >= end_ts {
            break;
        }
    }
    if want.is_empty() {
        return Err(format_err_t!(
            NotFound,
            "no segment overlaps [{}, {})",
            start_ts,
            end_ts
        ));
    }

    let first_end = want[0].end_ts;
    let skip_secs = first_end - start_ts;
    let want_skip = want[0].size as i64 - crate::segment::secs_to_bytes(skip_secs, cfg.bitrate);
    let leading_skip = want_skip.max(0) as u64;

    {
        let last = want.last_mut().unwrap();
        let trim_secs = last.end_ts - end_ts;
        let trim_bytes = crate::segment::secs_to_bytes(trim_secs, cfg.bitrate).max(0);
        let new_size = last.size as i64 - trim_bytes;
        if new_size <= 0 {
            want.pop();
        } else {
            last.size = new_size as u64;
        }
    }
    if want.is_empty() {
        return Err(format_err_t!(
            NotFound,
            "requested window [{}, {}) trims to nothing",
            start_ts,
            end_ts
        ));
    }

    let modtime = want.last().unwrap().end_ts;
    let first_path = cfg.root.join(&want[0].filename);
    let snapped_skip = framesync::next_frame_start(&first_path, leading_skip)?;
    let name = format!("{}-{}.mp3", start_ts, end_ts);

    Ok(ResolvedInterval {
        segments: want,
        leading_skip: snapped_skip,
        name,
        modtime,
    })
}

/// RAII directory-level `flock`, held for the lifetime of a `Store`. This
/// doesn't coordinate writers across machines or guard against anything
/// other processes choose not to flock themselves; it only catches a second
/// instance of this same store opening for write against the same root.
struct DirLock(RawFd);

impl DirLock {
    fn acquire(root: &std::path::Path, exclusive: bool) -> Result<DirLock, Error> {
        let fd = open(root, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())
            .map_err(|e| format_err_t!(Unknown, "open {}: {}", root.display(), e))?;
        let arg = if exclusive {
            FlockArg::LockExclusiveNonblock
        } else {
            FlockArg::LockSharedNonblock
        };
        if let Err(e) = flock(fd, arg) {
            let _ = nix::unistd::close(fd);
            return Err(format_err_t!(Unknown, "flock {}: {}", root.display(), e));
        }
        Ok(DirLock(fd))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::clock::SimulatedClocks;
    use base::ErrorKind;
    use std::io::Read as _;

    fn cfg(root: &std::path::Path) -> StoreConfig {
        StoreConfig {
            root: root.to_owned(),
            bitrate: 64_000,
            split_on_size: 1_000_000,
            split_on_silence: Duration::from_secs(3600),
            purge_on_size: 0,
            on_close_error: None,
        }
    }

    fn open_writable(root: &std::path::Path, clocks: Arc<dyn Clocks>) -> Store {
        Store::open_with_clocks(cfg(root), clocks, true).unwrap()
    }

    #[test]
    fn write_then_read_back_interval() {
        let dir = tempfile::tempdir().unwrap();
        let boot = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let sim = SimulatedClocks::new(boot);
        let clocks: Arc<dyn Clocks> = Arc::new(sim.clone());
        let store = open_writable(dir.path(), clocks.clone());

        // 64,000 bits/sec == 8,000 bytes/sec; advance so the write's end_ts
        // lands strictly inside the window we'll request below.
        sim.advance(Duration::from_secs(1));
        store.write(&vec![0xAAu8; 8_000]).unwrap();

        let mut r = store.reader_at(boot, Duration::from_secs(2)).unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        assert!(!buf.is_empty());
    }

    #[test]
    fn index_json_lists_finished_segments_only() {
        let dir = tempfile::tempdir().unwrap();
        let clocks: Arc<dyn Clocks> = Arc::new(SimulatedClocks::new(
            UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        ));
        let mut config = cfg(dir.path());
        config.split_on_size = 4_000; // force a rotation within one write
        let store = Store::open_with_clocks(config, clocks, true).unwrap();

        store.write(&vec![1u8; 4_000]).unwrap();
        store.write(&vec![2u8; 4_000]).unwrap();

        match store.open_name("index.json").unwrap() {
            Opened::Manifest(m) => assert_eq!(m.intervals.len(), 1),
            Opened::Stream(_) => panic!("expected manifest"),
        }
    }

    #[test]
    fn unrecognized_name_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(cfg(dir.path())).unwrap();
        let e = store.open_name("whatever.txt").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotFound);
    }
}
