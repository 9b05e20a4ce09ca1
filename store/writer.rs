// This file is part of mp3vault, a continuously-recorded MP3 archive.
// Copyright (C) 2026 The mp3vault Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later WITH GPL-3.0-linking-exception

//! Appends a continuous byte stream to the store, rotating to a new
//! timestamped segment on size or silence thresholds and purging the
//! oldest segments once a retention quota is exceeded.
//!
//! All of this runs under the façade's single mutex (see
//! [`crate::facade::Store::write`]); there's no separate writer lock.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::time::SystemTime;

use base::clock::{unix_secs, Clocks};
use base::{Error, ErrorKind, ResultExt};
use failure::Fail as _;

use crate::facade::StoreConfig;
use crate::segment::{self, Segment, CURRENT_FILENAME};
use crate::state::{DirectoryState, REFRESH_INTERVAL};

/// Mutable state the writer keeps in addition to the façade's cached
/// directory listing: whether the initial load has happened, the currently
/// open append file (if any), the last-write time, and any sticky error.
#[derive(Default)]
pub(crate) struct WriterRuntime {
    loaded: bool,
    current_file: Option<File>,
    last_write: Option<SystemTime>,
    sticky: Option<(ErrorKind, String)>,
}

fn error_with_kind(kind: ErrorKind, msg: String) -> Error {
    failure::err_msg(msg).context(kind).into()
}

pub(crate) fn write(
    rt: &mut WriterRuntime,
    dir: &mut DirectoryState,
    root: &Path,
    cfg: &StoreConfig,
    clocks: &dyn Clocks,
    buf: &[u8],
) -> Result<usize, Error> {
    if !rt.loaded {
        timestamp_current(dir, root, cfg)?;
        dir.refresh(root, clocks.now())?;
        rt.loaded = true;
    }
    open(rt, dir, root, cfg, clocks, buf.len());
    if let Some((kind, msg)) = rt.sticky.clone() {
        return Err(error_with_kind(kind, msg));
    }
    let file = rt.current_file.as_mut().expect("open() leaves current_file set when not sticky");
    let n = file.write(buf).err_kind(ErrorKind::Unknown)?;

    let now = clocks.now();
    let now_ts = unix_secs(now);
    {
        let live = dir
            .segments
            .last_mut()
            .expect("open() always leaves a live segment as the last entry");
        live.end_ts = now_ts;
        live.size += n as u64;
    }
    dir.total_size += n as u64;
    rt.last_write = Some(now);

    // The writer is the authority on the directory's contents while it's
    // running: don't bother rescanning from disk on the next inbound
    // operation just because the throttle expired.
    dir.next_refresh_at = Some(now + REFRESH_INTERVAL);

    Ok(n)
}

/// Decides whether a rotation is needed and, if so, performs it. Leaves
/// `rt.sticky` set on failure rather than returning an error directly, so
/// that `write` can report it the same way on every subsequent call until
/// the writer is closed.
fn open(
    rt: &mut WriterRuntime,
    dir: &mut DirectoryState,
    root: &Path,
    cfg: &StoreConfig,
    clocks: &dyn Clocks,
    incoming_len: usize,
) {
    let need_rotate = if rt.current_file.is_none() || rt.sticky.is_some() {
        true
    } else {
        let live_size = dir.segments.last().map(|s| s.size).unwrap_or(0);
        let size_trip = cfg.split_on_size > 0
            && live_size + incoming_len as u64 > cfg.split_on_size;
        let silence_trip = !cfg.split_on_silence.is_zero()
            && rt
                .last_write
                .and_then(|lw| clocks.now().duration_since(lw).ok())
                .map(|since| since > cfg.split_on_silence)
                .unwrap_or(false);
        size_trip || silence_trip
    };
    if !need_rotate {
        return;
    }
    rt.sticky = None;
    close_current(rt, cfg);
    if let Err(e) = timestamp_current(dir, root, cfg) {
        rt.sticky = Some((e.kind(), e.to_string()));
        return;
    }
    match open_current_exclusive(root) {
        Ok(f) => {
            rt.current_file = Some(f);
            dir.segments.push(Segment {
                filename: CURRENT_FILENAME.to_string(),
                end_ts: unix_secs(clocks.now()),
                size: 0,
            });
        }
        Err(e) => {
            rt.sticky = Some((e.kind(), e.to_string()));
        }
    }
}

fn open_current_exclusive(root: &Path) -> Result<File, Error> {
    OpenOptions::new()
        .create_new(true)
        .append(true)
        .open(root.join(CURRENT_FILENAME))
        .err_kind(ErrorKind::Unknown)
}

fn close_current(rt: &mut WriterRuntime, cfg: &StoreConfig) {
    if let Some(f) = rt.current_file.take() {
        if let Err(e) = f.sync_all() {
            let err = error_with_kind(ErrorKind::Unknown, format!("error closing segment: {}", e));
            match &cfg.on_close_error {
                Some(cb) => cb(err),
                None => log::warn!("{}", err),
            }
        }
    }
}

/// Renames `current.mp3` to its finished name and purges, if there is a
/// live segment in the cached state. No-op otherwise.
fn timestamp_current(
    dir: &mut DirectoryState,
    root: &Path,
    cfg: &StoreConfig,
) -> Result<(), Error> {
    let is_live_last = dir.segments.last().map(|s| s.is_live()).unwrap_or(false);
    if !is_live_last {
        return Ok(());
    }
    let end_ts = dir.segments.last().unwrap().end_ts;
    let new_name = segment::finished_filename(end_ts);
    std::fs::rename(root.join(CURRENT_FILENAME), root.join(&new_name)).err_kind(ErrorKind::Unknown)?;
    dir.segments.last_mut().unwrap().filename = new_name;
    purge(dir, root, cfg)
}

/// Deletes the oldest finished segments until `total_size + split_on_size`
/// is back under `purge_on_size`, or only the live segment remains. The
/// `+ split_on_size` slack leaves headroom for the next live file to grow
/// to its configured maximum without re-tripping purge inside a rotation.
fn purge(dir: &mut DirectoryState, root: &Path, cfg: &StoreConfig) -> Result<(), Error> {
    if cfg.purge_on_size == 0 {
        return Ok(());
    }
    let mut purged = 0usize;
    let mut err: Option<std::io::Error> = None;
    while dir.segments.len().saturating_sub(1) > purged
        && dir.total_size + cfg.split_on_size > cfg.purge_on_size
    {
        let victim = &dir.segments[purged];
        match std::fs::remove_file(root.join(&victim.filename)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("error removing {}: {}", victim.filename, e);
                err = Some(e);
                break;
            }
        }
        dir.total_size -= victim.size;
        purged += 1;
    }
    if purged > 0 {
        dir.segments.drain(0..purged);
    }
    match err {
        Some(e) => Err(e).err_kind(ErrorKind::Unknown),
        None => Ok(()),
    }
}

/// Closes the writer's current file without rotating. Returns the sticky
/// error, if any, so a caller can tell the last write actually failed.
pub(crate) fn close(rt: &mut WriterRuntime, cfg: &StoreConfig) -> Result<(), Error> {
    close_current(rt, cfg);
    match rt.sticky.take() {
        Some((kind, msg)) => Err(error_with_kind(kind, msg)),
        None => Ok(()),
    }
}
