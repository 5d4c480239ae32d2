// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Command-line 9P2000.L server over a local directory.
// Author: Lukas Bower

//! `ninegated` serves a host directory over 9P2000.L.
//!
//! ```text
//! ninegated --root /srv/export --listen 0.0.0.0:5640
//! mount -t 9p -o trans=tcp,port=5640,version=9p2000.L <host> /mnt
//! ```

use std::net::TcpListener;
#[cfg(unix)]
use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use ninegate::fsimpl::localfs::LocalFs;
use ninegate::Server;

#[derive(Parser, Debug)]
#[command(name = "ninegated", about = "9P2000.L file server")]
struct Args {
    /// Directory to export.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// TCP address to listen on.
    #[arg(long, default_value = "127.0.0.1:5640", conflicts_with = "unix")]
    listen: String,

    /// Serve on a Unix socket path instead of TCP.
    #[cfg(unix)]
    #[arg(long)]
    unix: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("resolving root {}", args.root.display()))?;
    info!("exporting {}", root.display());

    let server = Server::new(LocalFs::new(root));

    #[cfg(unix)]
    if let Some(path) = &args.unix {
        let _ = std::fs::remove_file(path);
        let listener =
            UnixListener::bind(path).with_context(|| format!("binding {}", path.display()))?;
        server.serve_unix(listener)?;
        return Ok(());
    }

    let listener =
        TcpListener::bind(&args.listen).with_context(|| format!("binding {}", args.listen))?;
    server.serve(listener)?;
    Ok(())
}
