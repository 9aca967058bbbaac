//! pcap replay/dump example
//!
//! Reads a capture, runs every frame through the graph (parsing it on
//! the way) and writes what survives to a new capture. Stops by itself
//! once the input is exhausted and the pipeline goes quiet.

use std::time::Duration;

use clap::Parser;

use flux_common::{Config, FluxResult};
use flux_packet::Packet;
use flux_runtime::driver::PcapPort;
use flux_runtime::{System, Verdict};

#[derive(Parser)]
#[command(name = "pktcap")]
#[command(about = "Replay a pcap file through the pipeline into a new pcap file")]
struct Args {
    /// CPU cores to use
    #[arg(long, default_value = "0-1")]
    cores: String,

    /// Capture to replay
    #[arg(long)]
    input: String,

    /// Capture to write
    #[arg(long)]
    output: String,
}

fn main() {
    flux_demos::init_tracing();
    if let Err(e) = run(Args::parse()) {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> FluxResult<()> {
    let mut system = System::init(Config {
        cpu_list: Some(args.cores),
        ..Default::default()
    })?;

    let port = PcapPort::replay_dump(&args.input, &args.output)?;
    let p0 = system.register_port(Box::new(port))?;

    let input = system.add_receiver(p0)?;
    // Frames the view cannot place an L3 header in are dropped rather
    // than copied into the output capture.
    let parsed = system.add_drop_handler(input, |pkt: &mut Packet<'_>| {
        Verdict::from(pkt.parse_l3() >= 0)
    })?;
    system.add_sender(parsed, p0)?;

    let stop = system.stop_handle();
    flux_demos::install_sigint(stop.clone());
    let stats = system.stats();

    // Auto-stop once the counters sit still (input exhausted)
    let watcher = {
        let stop = stop.clone();
        let stats = stats.clone();
        std::thread::spawn(move || {
            let mut last = stats.snapshot();
            loop {
                std::thread::sleep(Duration::from_millis(500));
                if stop.is_stopped() {
                    return;
                }
                let now = stats.snapshot();
                if now == last && now.in_packets > 0 {
                    stop.stop();
                    return;
                }
                last = now;
            }
        })
    };

    system.start()?;
    watcher.join().ok();

    let snap = stats.snapshot();
    println!(
        "replayed={} written={} dropped={}",
        snap.in_packets, snap.out_packets, snap.dropped
    );
    Ok(())
}
