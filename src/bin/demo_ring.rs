// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Producer / consumer demo.
//
// Usage:
//   demo_ring send <ring> <size> <interval_ms>
//   demo_ring recv <ring | tcp://host/ring>
//   demo_ring stat <ring>
//
// The sender creates <ring> if needed and puts a <size>-byte record of 'A'
// every <interval_ms> milliseconds. The receiver prints each chunk it gets
// and notices when the producer goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use daqring::{consume_from, Consumer, Monitor, Producer, RingBuffer};

fn fail(what: &str, e: daqring::Error) -> ! {
    eprintln!("demo_ring: {what}: {e}");
    std::process::exit(1);
}

fn do_send(ring: &str, size: usize, interval_ms: u64, quit: Arc<AtomicBool>) {
    match RingBuffer::create(ring) {
        Ok(()) => println!("send: created {ring}"),
        Err(e) if e.is_already_exists() => {}
        Err(e) => fail("create", e),
    }
    let mut producer = Producer::attach(ring).unwrap_or_else(|e| fail("attach", e));
    let buffer = vec![b'A'; size];
    while !quit.load(Ordering::Acquire) {
        producer.put(&buffer).unwrap_or_else(|e| fail("put", e));
        println!("send size: {} (put space {})", buffer.len(), producer.put_space());
        thread::sleep(Duration::from_millis(interval_ms));
    }
}

fn do_recv(source: &str, quit: Arc<AtomicBool>) {
    let mut consumer = if source.contains("://") {
        consume_from(source)
    } else {
        Consumer::attach(source)
    }
    .unwrap_or_else(|e| fail("attach", e));
    println!("recv: attached to {} slot {}", consumer.name(), consumer.slot());

    let mut buf = vec![0u8; 64 * 1024];
    let mut idle = 0usize;
    while !quit.load(Ordering::Acquire) {
        let n = consumer.get(&mut buf, 0).unwrap_or_else(|e| fail("get", e));
        if n > 0 {
            println!("recv size: {n}");
            idle = 0;
            continue;
        }
        idle += 1;
        if idle % 1000 == 0 && consumer.usage().producer_pid.is_none() {
            println!("recv: no producer on {}", consumer.name());
        }
        thread::sleep(Duration::from_millis(1));
    }
}

fn do_stat(ring: &str) {
    let monitor = Monitor::attach(ring).unwrap_or_else(|e| fail("attach", e));
    let u = monitor.usage();
    println!("ring          {ring}");
    println!("buffer space  {}", u.buffer_space);
    println!("put space     {}", u.put_space);
    println!("consumers     {}/{}", u.consumers.len(), u.max_consumers);
    println!("get space     min {} max {}", u.min_get_space, u.max_get_space);
    if let Some(p) = u.producer_stats {
        println!("producer      pid {} transfers {} bytes {}", p.pid, p.transfers, p.bytes);
    }
    for c in &u.consumer_stats {
        println!("consumer      pid {} transfers {} bytes {}", c.pid, c.transfers, c.bytes);
    }
    for client in monitor.clients() {
        println!("{:<13} {} {}", client.role.to_string(), client.pid, client.command);
    }
}

fn main() {
    if let Err(e) = daqring::logging::init_tracing("warn") {
        eprintln!("demo_ring: cannot install logger: {e}");
    }
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: demo_ring send <ring> <size> <interval_ms>");
        eprintln!("       demo_ring recv <ring | tcp://host/ring>");
        eprintln!("       demo_ring stat <ring>");
        std::process::exit(1);
    }

    let quit = Arc::new(AtomicBool::new(false));
    {
        let q = Arc::clone(&quit);
        ctrlc_or_sigterm(move || q.store(true, Ordering::Release));
    }

    match args[1].as_str() {
        "send" => {
            if args.len() < 5 {
                eprintln!("usage: demo_ring send <ring> <size> <interval_ms>");
                std::process::exit(1);
            }
            let (Ok(size), Ok(interval)) = (args[3].parse::<usize>(), args[4].parse::<u64>()) else {
                eprintln!("demo_ring: size and interval must be numbers");
                std::process::exit(1);
            };
            do_send(&args[2], size, interval, quit);
        }
        "recv" => do_recv(&args[2], quit),
        "stat" => do_stat(&args[2]),
        other => {
            eprintln!("unknown mode: {other}");
            std::process::exit(1);
        }
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
