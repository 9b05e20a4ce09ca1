// This file is part of mp3vault, a continuously-recorded MP3 archive.
// Copyright (C) 2026 The mp3vault Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later WITH GPL-3.0-linking-exception

//! `index.json`: a manifest of the audio intervals a store currently holds.

use serde::Serialize;

use crate::segment::bytes_to_secs;
use crate::state::DirectoryState;

/// One entry per finished segment: `(audio_start_ts, duration_seconds)`.
/// The live segment is omitted — its duration is still changing.
#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub intervals: Vec<(i64, i64)>,
}

pub fn build(state: &DirectoryState, bitrate: u32) -> Manifest {
    let intervals = state
        .segments
        .iter()
        .filter(|s| !s.is_live())
        .map(|s| (s.start_ts(bitrate), bytes_to_secs(s.size, bitrate)))
        .collect();
    Manifest { intervals }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;

    #[test]
    fn omits_live_segment() {
        let mut state = DirectoryState::default();
        state.segments.push(Segment { filename: "t100.mp3".into(), end_ts: 100, size: 800_000 });
        state.segments.push(Segment {
            filename: crate::segment::CURRENT_FILENAME.into(),
            end_ts: 110,
            size: 80_000,
        });
        let m = build(&state, 64_000);
        assert_eq!(m.intervals, vec![(0, 100)]);
    }
}
