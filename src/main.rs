// This file is part of mp3vault, a continuously-recorded MP3 archive.
// Copyright (C) 2026 The mp3vault Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later WITH GPL-3.0-linking-exception

mod cmds;

use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "mp3vault", about = "A time-indexed, append-only MP3 store.")]
struct Opt {
    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(StructOpt)]
enum Cmd {
    /// Reads raw MP3 bytes from stdin (or a file) and appends them to a store.
    Ingest(cmds::ingest::Args),

    /// Serves a store's contents over HTTP.
    Serve(cmds::serve::Args),
}

/// Installs a logger reading its format/level from `MP3VAULT_FORMAT` and
/// `MP3VAULT_LOG`, the same environment-variable convention as the rest of
/// this codebase's ancestry.
fn init_logging() -> mylog::Handle {
    let h = mylog::Builder::new()
        .set_format(
            ::std::env::var("MP3VAULT_FORMAT")
                .map(|s| match s.as_str() {
                    "google-systemd" => mylog::Format::GoogleSystemd,
                    "google" => mylog::Format::Google,
                    _ => mylog::Format::Google,
                })
                .unwrap_or(mylog::Format::Google),
        )
        .set_spec(&::std::env::var("MP3VAULT_LOG").unwrap_or_else(|_| "info".to_owned()))
        .build();
    h.clone().install();
    h
}

fn main() {
    let _h = init_logging();
    let opt = Opt::from_args();
    let result = match opt.cmd {
        Cmd::Ingest(args) => cmds::ingest::run(args),
        Cmd::Serve(args) => cmds::serve::run(args),
    };
    if let Err(e) = result {
        eprintln!("{}", base::prettify_failure(&e.into()));
        std::process::exit(1);
    }
}
