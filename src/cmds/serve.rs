// This file is part of mp3vault, a continuously-recorded MP3 archive.
// Copyright (C) 2026 The mp3vault Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later WITH GPL-3.0-linking-exception

//! `mp3vault serve`: a minimal HTTP front end over a store.
//!
//! Routing and error rendering beyond mapping `base::ErrorKind` to a status
//! code are deliberately thin here; the store's façade does all the real
//! work. `GET /index.json` returns the manifest; `GET /<start>-<end>.mp3`
//! streams a resolved interval.

use std::convert::Infallible;
use std::io::Read as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use structopt::StructOpt;

use base::{Error, ErrorKind, ResultExt};
use store::{Opened, Store, StoreConfig};

const READ_CHUNK: usize = 64 * 1024;

#[derive(StructOpt)]
pub struct Args {
    /// Directory the store lives in. Must already exist.
    #[structopt(long)]
    root: PathBuf,

    /// Nominal bitrate used to resolve intervals, in bits/sec.
    #[structopt(long, default_value = "64000")]
    bitrate: u32,

    /// Address to bind the HTTP server to.
    #[structopt(long, default_value = "0.0.0.0:8080")]
    http_addr: SocketAddr,
}

pub fn run(args: Args) -> Result<(), Error> {
    let config = StoreConfig {
        root: args.root.clone(),
        bitrate: args.bitrate,
        split_on_size: 0,
        split_on_silence: Duration::from_secs(0),
        purge_on_size: 0,
        on_close_error: None,
    };
    let store = Arc::new(Store::open(config)?);
    let addr = args.http_addr;

    let make_svc = make_service_fn(move |_conn| {
        let store = store.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(store.clone(), req))) }
    });

    let mut rt = tokio::runtime::Runtime::new().err_kind(ErrorKind::Unknown)?;
    rt.block_on(async move {
        log::info!("listening on http://{}", addr);
        if let Err(e) = Server::bind(&addr).serve(make_svc).await {
            log::error!("server error: {}", e);
        }
    });
    Ok(())
}

async fn handle(store: Arc<Store>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Ok(status_response(StatusCode::METHOD_NOT_ALLOWED));
    }
    let name = req.uri().path().to_string();
    let opened = match tokio::task::spawn_blocking(move || store.open_name(&name)).await {
        Ok(Ok(opened)) => opened,
        Ok(Err(e)) => return Ok(error_response(&e)),
        Err(e) => {
            log::error!("serve task panicked: {}", e);
            return Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR));
        }
    };
    match opened {
        Opened::Manifest(m) => match serde_json::to_vec(&m) {
            Ok(body) => Ok(Response::builder()
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap()),
            Err(e) => {
                log::error!("error encoding manifest: {}", e);
                Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR))
            }
        },
        Opened::Stream(r) => Ok(stream_response(r)),
    }
}

/// Streams a resolved interval's bytes out over a `hyper::Body` channel,
/// doing the blocking file reads on a dedicated thread.
fn stream_response(mut r: store::Reader) -> Response<Body> {
    let len = r.size();
    let (mut sender, body) = Body::channel();
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match r.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if futures::executor::block_on(sender.send_data(chunk)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("error reading segment: {}", e);
                    sender.abort();
                    break;
                }
            }
        }
    });
    Response::builder()
        .header("content-type", "audio/mpeg")
        .header("content-length", len.to_string())
        .body(body)
        .unwrap()
}

fn status_response(status: StatusCode) -> Response<Body> {
    Response::builder().status(status).body(Body::empty()).unwrap()
}

fn error_response(e: &Error) -> Response<Body> {
    let status = match e.kind() {
        ErrorKind::NotFound | ErrorKind::InvalidArgument => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Response::builder()
        .status(status)
        .body(Body::from(e.to_string()))
        .unwrap()
}
