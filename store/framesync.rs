// This file is part of mp3vault, a continuously-recorded MP3 archive.
// Copyright (C) 2026 The mp3vault Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later WITH GPL-3.0-linking-exception

//! MP3 frame-sync scanning.
//!
//! Byte offsets derived from `bitrate × seconds` almost never land on a
//! frame boundary; serving unaligned bytes produces a stream that no MP3
//! player will sync to. This is the only place an MP3 parser is needed, and
//! a minimal hand-rolled sync scanner suffices: search for `0xFF` followed
//! by a byte whose top three bits are set, then validate the header fields
//! enough to be confident it's a real frame and not a false positive in
//! audio data.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use base::{Error, ErrorKind, ResultExt};

/// How far past `pos` we're willing to scan looking for a frame sync before
/// giving up and treating it as EOF. A valid MPEG1 Layer III frame is at
/// most a few KB; this is generous.
const MAX_SCAN: usize = 1 << 16;

/// Returns the offset of the next valid MP3 frame header at or after `pos`
/// in `path`. If no header is found before EOF, returns the file's length
/// (i.e., the position is at EOF).
pub fn next_frame_start(path: &std::path::Path, pos: u64) -> Result<u64, Error> {
    let mut f = File::open(path).err_kind(ErrorKind::Unknown)?;
    let len = f.metadata().err_kind(ErrorKind::Unknown)?.len();
    if pos >= len {
        return Ok(len);
    }
    f.seek(SeekFrom::Start(pos)).err_kind(ErrorKind::Unknown)?;
    let mut buf = vec![0u8; std::cmp::min(MAX_SCAN, (len - pos) as usize).max(4)];
    let n = read_fill(&mut f, &mut buf).err_kind(ErrorKind::Unknown)?;
    buf.truncate(n);

    let mut i = 0usize;
    while i + 4 <= buf.len() {
        if is_frame_header(&buf[i..i + 4]) {
            return Ok(pos + i as u64);
        }
        i += 1;
    }
    // No sync found in the scanned window: report EOF at the current
    // position, matching a decoder that reports end-of-file before finding
    // a frame.
    Ok(pos + buf.len() as u64)
}

/// Fills `buf` as far as possible from `r`, stopping at EOF. Returns the
/// number of bytes actually read (which may be less than `buf.len()`).
fn read_fill<R: Read>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Checks the first four bytes of a would-be MPEG audio frame header for
/// plausibility: sync word, a valid (non-reserved) MPEG version, layer,
/// bitrate index and sample-rate index.
fn is_frame_header(b: &[u8]) -> bool {
    if b.len() < 4 {
        return false;
    }
    if b[0] != 0xFF || (b[1] & 0xE0) != 0xE0 {
        return false;
    }
    let version = (b[1] >> 3) & 0x03; // 0b01 is reserved
    let layer = (b[1] >> 1) & 0x03; // 0b00 is reserved
    let bitrate_index = (b[2] >> 4) & 0x0F; // 0 = free, 0xF = bad
    let sample_rate_index = (b[2] >> 2) & 0x03; // 0b11 is reserved
    version != 0b01 && layer != 0b00 && bitrate_index != 0x0F && sample_rate_index != 0b11
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    // A real 64 kbps MPEG1 Layer III silent frame header + LAME padding,
    // matching the fixture the original mp3dir test suite used.
    const FRAME: [u8; 12] = [
        0xff, 0xfb, 0x54, 0xc4, 0x00, 0x03, 0xc0, 0x00, 0x01, 0xa4, 0x00, 0x00,
    ];

    #[test]
    fn finds_sync_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t1.mp3");
        let mut f = File::create(&path).unwrap();
        f.write_all(&FRAME).unwrap();
        drop(f);
        assert_eq!(next_frame_start(&path, 0).unwrap(), 0);
    }

    #[test]
    fn skips_garbage_to_find_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t1.mp3");
        let mut f = File::create(&path).unwrap();
        f.write_all(&[0x00, 0x11, 0x22]).unwrap();
        f.write_all(&FRAME).unwrap();
        drop(f);
        assert_eq!(next_frame_start(&path, 0).unwrap(), 3);
    }

    #[test]
    fn reports_eof_position_when_no_sync_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t1.mp3");
        let mut f = File::create(&path).unwrap();
        f.write_all(&[0x00, 0x11, 0x22, 0x33]).unwrap();
        drop(f);
        assert_eq!(next_frame_start(&path, 0).unwrap(), 4);
    }

    #[test]
    fn pos_past_eof_returns_len() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t1.mp3");
        File::create(&path).unwrap().write_all(&FRAME).unwrap();
        assert_eq!(
            next_frame_start(&path, 1000).unwrap(),
            FRAME.len() as u64
        );
    }
}
