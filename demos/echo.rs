//! Minimal consumer wiring for [`mcu_scheduler::Host`]: opens one serial
//! link, registers a single echo task, schedules a handful of messages,
//! and prints whatever the Printer renders. Stands in for the real
//! elevator-platform collaborator (out of scope for this crate) just to
//! exercise `Host` end to end against real hardware or a loopback cable.
//!
//! Usage: `cargo run --example echo -- <port> [task_id] [payload_byte]`

use std::time::Duration;

use mcu_scheduler::{Host, HostConfig, Priority, TaskType};
use simplelog::{Config, LevelFilter, SimpleLogger};

fn parse_args() -> (String, u8, u8) {
    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| {
        eprintln!("usage: echo <port> [task_id] [payload_byte]");
        std::process::exit(1);
    });
    let task_id = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10u8);
    let payload_byte = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0xAAu8);
    (port, task_id, payload_byte)
}

#[tokio::main]
async fn main() {
    let _ = SimpleLogger::init(LevelFilter::Info, Config::default());
    let (port, task_id, payload_byte) = parse_args();

    let host = Host::new(HostConfig::default());
    host.broadcast_register(task_id, 1, |ctx, payload| {
        println!(
            "[link {:?}] echo task {task_id} received {payload:?}",
            ctx.worker_id
        );
        0
    })
    .expect("echo task registration");

    let link = host
        .open_link_default(&port)
        .await
        .unwrap_or_else(|err| panic!("failed to open {port}: {err}"));
    println!("opened link {link:?} on {port}");

    host.broadcast_schedule(task_id, TaskType::External, &[payload_byte], Priority::Normal)
        .expect("schedule echo task");

    tokio::time::sleep(Duration::from_secs(2)).await;
    host.close_all().await;
}
