// This file is part of mp3vault, a continuously-recorded MP3 archive.
// Copyright (C) 2026 The mp3vault Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later WITH GPL-3.0-linking-exception

//! `mp3vault ingest`: appends raw MP3 bytes from stdin (or a file) to a
//! store, standing in for a real audio producer.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use base::{Error, ErrorKind, ResultExt};
use structopt::StructOpt;

const READ_CHUNK: usize = 64 * 1024;

#[derive(StructOpt)]
pub struct Args {
    /// Directory the store lives in. Created if it doesn't exist.
    #[structopt(long)]
    root: PathBuf,

    /// Nominal bitrate of the incoming stream, in bits/sec.
    #[structopt(long, default_value = "64000")]
    bitrate: u32,

    /// Rotate to a new segment once the live one reaches this many bytes.
    /// 0 disables size-based rotation.
    #[structopt(long, default_value = "0")]
    split_on_size: u64,

    /// Rotate to a new segment after this many seconds without a write.
    /// 0 disables silence-based rotation.
    #[structopt(long, default_value = "0")]
    split_on_silence_secs: u64,

    /// Delete the oldest finished segments once total size exceeds this
    /// many bytes. 0 disables purging.
    #[structopt(long, default_value = "0")]
    purge_on_size: u64,

    /// Read from this file instead of stdin.
    #[structopt(long)]
    input: Option<PathBuf>,
}

pub fn run(args: Args) -> Result<(), Error> {
    std::fs::create_dir_all(&args.root).err_kind(ErrorKind::Unknown)?;

    let config = store::StoreConfig {
        root: args.root.clone(),
        bitrate: args.bitrate,
        split_on_size: args.split_on_size,
        split_on_silence: Duration::from_secs(args.split_on_silence_secs),
        purge_on_size: args.purge_on_size,
        on_close_error: None,
    };
    let store = store::Store::open_for_writing(config)?;

    let mut input: Box<dyn Read> = match &args.input {
        Some(p) => Box::new(File::open(p).err_kind(ErrorKind::Unknown)?),
        None => Box::new(std::io::stdin()),
    };

    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf).err_kind(ErrorKind::Unknown)?;
        if n == 0 {
            break;
        }
        store.write(&buf[..n])?;
        total += n as u64;
    }
    store.close_writer()?;
    log::info!("ingest: wrote {} bytes to {}", total, args.root.display());
    Ok(())
}
