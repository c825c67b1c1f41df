// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-host ring master daemon.
//
// Usage:
//   ringmaster [--port <port>] [--bind <addr>] [--portman <port>] [--no-scan]
//
// Without --port the listening port is leased from the port manager under the
// service name "RingMaster" (port 30000 unless --portman says otherwise).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use daqring::config::{DEFAULT_PORT_MANAGER_PORT, RING_MASTER_SERVICE};
use daqring::master::server::wake_listener;
use daqring::master::{PortManagerClient, RingMaster};

struct Options {
    port: Option<u16>,
    bind: String,
    portman: u16,
    scan: bool,
}

fn usage() -> ! {
    eprintln!("usage: ringmaster [--port <port>] [--bind <addr>] [--portman <port>] [--no-scan]");
    std::process::exit(1);
}

fn parse_args() -> Options {
    let mut opts = Options {
        port: None,
        bind: "0.0.0.0".to_owned(),
        portman: DEFAULT_PORT_MANAGER_PORT,
        scan: true,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = || args.next().unwrap_or_else(|| usage());
        match arg.as_str() {
            "--port" => opts.port = Some(value().parse().unwrap_or_else(|_| usage())),
            "--bind" => opts.bind = value(),
            "--portman" => opts.portman = value().parse().unwrap_or_else(|_| usage()),
            "--no-scan" => opts.scan = false,
            _ => usage(),
        }
    }
    opts
}

fn main() {
    if let Err(e) = daqring::logging::init_tracing("info") {
        eprintln!("ringmaster: cannot install logger: {e}");
    }
    let opts = parse_args();

    // Hold the lease for the life of the process.
    let (port, _lease) = match opts.port {
        Some(p) => (p, None),
        None => match PortManagerClient::new("localhost", opts.portman).allocate(RING_MASTER_SERVICE) {
            Ok(lease) => (lease.port, Some(lease)),
            Err(e) => {
                tracing::error!(error = %e, "could not obtain a port from the port manager");
                std::process::exit(1);
            }
        },
    };

    let master = match RingMaster::bind((opts.bind.as_str(), port)) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, port, "cannot listen");
            std::process::exit(1);
        }
    };
    if opts.scan {
        let found = master.directory().scan_host();
        tracing::info!(found, "registered existing rings");
    }

    let quit = Arc::new(AtomicBool::new(false));
    {
        let q = Arc::clone(&quit);
        ctrlc_or_sigterm(move || q.store(true, Ordering::Release));
    }
    {
        let stop = master.stop_flag();
        let addr = master.local_addr().unwrap_or_else(|_| usage());
        let q = Arc::clone(&quit);
        thread::spawn(move || {
            while !q.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(200));
            }
            tracing::info!("shutting down");
            wake_listener(&stop, addr);
        });
    }

    if let Err(e) = master.serve() {
        tracing::error!(error = %e, "ring master failed");
        std::process::exit(1);
    }
}

// Minimal signal hook: runs `f` on SIGINT / SIGTERM / SIGHUP.
fn ctrlc_or_sigterm(f: impl Fn() + Send + 'static) {
    use std::sync::Mutex;
    static CB: std::sync::OnceLock<Mutex<Box<dyn Fn() + Send>>> = std::sync::OnceLock::new();
    CB.get_or_init(|| Mutex::new(Box::new(f)));
    extern "C" fn handler(_: libc::c_int) {
        if let Some(cb) = CB.get() {
            if let Ok(g) = cb.try_lock() {
                g();
            }
        }
    }
    unsafe {
        libc::signal(libc::SIGINT, handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGHUP, handler as *const () as libc::sighandler_t);
    }
}
