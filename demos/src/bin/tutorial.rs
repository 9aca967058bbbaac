//! Tutorial: the smallest useful graph
//!
//! A generator feeds one side of a loopback link; the other side
//! receives, stamps a byte in the payload, and stops the flow. Watch
//! the counters tick until Ctrl-C.

use std::time::Duration;

use clap::Parser;

use flux_common::{Config, FluxResult};
use flux_packet::Packet;
use flux_runtime::driver::LoopbackPort;
use flux_runtime::System;

#[derive(Parser)]
#[command(name = "tutorial")]
#[command(about = "Generator -> loopback -> handler -> stopper")]
struct Args {
    /// CPU cores to use
    #[arg(long, default_value = "0-1")]
    cores: String,

    /// Packets per second to generate
    #[arg(long, default_value_t = 1000)]
    rate: u64,
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

    let (near, far) = LoopbackPort::pair(4096);
    let near = system.register_port(Box::new(near))?;
    let far = system.register_port(Box::new(far))?;

    let generated = system.add_generator(
        |pkt: &mut Packet<'_>| {
            pkt.init_ipv4_udp(32).expect("frame fits");
            pkt.set_dst_port(7).expect("udp parsed");
        },
        args.rate,
    )?;
    system.add_sender(generated, near)?;

    let received = system.add_receiver(far)?;
    let stamped = system.add_handler(received, |pkt: &mut Packet<'_>| {
        if pkt.parse_l4_data() >= 0 {
            if let Some(payload) = pkt.payload_mut() {
                payload[0] = 0x42;
            }
        }
    })?;
    system.add_stopper(stamped)?;

    let stop = system.stop_handle();
    flux_demos::install_sigint(stop.clone());
    let stats = system.stats();

    let reporter = {
        let stop = stop.clone();
        let stats = stats.clone();
        std::thread::spawn(move || {
            while !stop.is_stopped() {
                std::thread::sleep(Duration::from_secs(1));
                let s = stats.snapshot();
                tracing::info!(generated = s.in_packets, consumed = s.dropped, "tick");
            }
        })
    };

    system.start()?;
    reporter.join().ok();
    Ok(())
}
