//! ACL forwarding example
//!
//! Receives on port 0, splits five ways on the first-match ACL label
//! (label 0 drops) and forwards labels 1-4 to ports 0-3. A small
//! injector thread plays the NIC: it feeds synthetic UDP frames into
//! port 0 until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use flux_acl::RuleSet;
use flux_common::{Config, FluxResult};
use flux_packet::buffer::PacketBuffer;
use flux_packet::Packet;
use flux_runtime::driver::MemoryPort;
use flux_runtime::System;

#[derive(Parser)]
#[command(name = "forwarding")]
#[command(about = "Split a received flow across output ports by ACL label")]
struct Args {
    /// CPU cores to use, e.g. "0-3" or "0,2,4"
    #[arg(long, default_value = "0-3")]
    cores: String,

    /// ACL rule file (one rule per line)
    #[arg(long, default_value = "demos/forwarding.conf")]
    config: String,
}

const FLOWS: usize = 5;

fn main() {
    flux_demos::init_tracing();
    if let Err(e) = run(Args::parse()) {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> FluxResult<()> {
    let rules = Arc::new(RuleSet::load(&args.config)?);
    tracing::info!(rules = rules.len(), file = %args.config, "loaded ACL");

    let mut system = System::init(Config {
        cpu_list: Some(args.cores),
        ..Default::default()
    })?;

    let ports: Vec<MemoryPort> = (0..4).map(|_| MemoryPort::new(4096)).collect();
    let rx_handle = ports[0].handle();
    let out_handles: Vec<_> = ports.iter().map(|p| p.handle()).collect();
    for port in ports {
        system.register_port(Box::new(port))?;
    }

    let input = system.add_receiver(0)?;
    let classify = {
        let rules = rules.clone();
        move |pkt: &mut Packet<'_>| rules.classify(pkt) as usize
    };
    let outs = system.add_splitter(input, classify, FLOWS)?;
    let mut outs = outs.into_iter();
    // Label 0 is "no match": drop without sending.
    system.add_stopper(outs.next().unwrap())?;
    for port in 0..4u16 {
        system.add_sender(outs.next().unwrap(), port)?;
    }

    let stop = system.stop_handle();
    flux_demos::install_sigint(stop.clone());
    let stats = system.stats();

    // Synthetic traffic source and sinks
    let feeder = {
        let stop = stop.clone();
        std::thread::spawn(move || {
            let mut n = 0u64;
            while !stop.is_stopped() {
                let dst = [53u16, 80, 123, 443, 9999][(n % 5) as usize];
                let mut buf = PacketBuffer::empty();
                let mut pkt = Packet::new(&mut buf);
                pkt.init_ipv4_udp(32).expect("frame fits");
                pkt.set_dst_port(dst).expect("udp parsed");
                rx_handle.inject(buf.data().to_vec());
                for h in &out_handles {
                    while h.pop_transmitted().is_some() {}
                }
                n += 1;
                std::thread::sleep(Duration::from_micros(200));
            }
        })
    };

    system.start()?;
    feeder.join().ok();

    let snap = stats.snapshot();
    println!(
        "in={} out={} dropped={} broken={}",
        snap.in_packets, snap.out_packets, snap.dropped, snap.broken
    );
    Ok(())
}
