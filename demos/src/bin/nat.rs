//! Source NAT example
//!
//! Two ports: traffic arriving on the private port gets its source
//! address rewritten to the public address and leaves through the
//! public port; return traffic gets the destination restored. Checksums
//! are recomputed in software with `--csum`, or requested from hardware
//! offload with `--hwcsum`.

use std::net::Ipv4Addr;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use flux_common::{Config, FluxError, FluxResult};
use flux_packet::buffer::PacketBuffer;
use flux_packet::Packet;
use flux_runtime::driver::MemoryPort;
use flux_runtime::System;

#[derive(Parser)]
#[command(name = "nat")]
#[command(about = "Rewrite addresses between a private and a public port")]
struct Args {
    /// CPU cores to use
    #[arg(long, default_value = "0-3")]
    cores: String,

    /// NAT configuration file
    #[arg(long, default_value = "demos/nat.json")]
    config: String,

    /// Recompute checksums of modified packets in software
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    csum: bool,

    /// Request hardware checksum offload instead (implies --csum)
    #[arg(long, action = clap::ArgAction::Set, default_value_t = false)]
    hwcsum: bool,
}

#[derive(Debug, Deserialize)]
struct NatConfig {
    /// Address presented to the public side
    public_ip: Ipv4Addr,
    /// Address of the single private host (demo keeps the table static)
    private_ip: Ipv4Addr,
}

fn main() {
    flux_demos::init_tracing();
    if let Err(e) = run(Args::parse()) {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> FluxResult<()> {
    let text = std::fs::read_to_string(&args.config)?;
    let nat: NatConfig =
        serde_json::from_str(&text).map_err(|e| FluxError::Config(e.to_string()))?;
    tracing::info!(?nat, "loaded NAT config");

    let mut system = System::init(Config {
        cpu_list: Some(args.cores),
        hw_tx_checksum: args.hwcsum,
        ..Default::default()
    })?;
    let hwcsum = system.hw_tx_checksum();
    let csum = args.csum || hwcsum;

    let private = MemoryPort::new(4096);
    let public = MemoryPort::new(4096);
    let priv_handle = private.handle();
    let pub_handle = public.handle();
    let p_priv = system.register_port(Box::new(private))?;
    let p_pub = system.register_port(Box::new(public))?;

    // Private → public: source NAT
    let outbound = system.add_receiver(p_priv)?;
    let public_ip = nat.public_ip;
    let outbound = system.add_handler(outbound, move |pkt: &mut Packet<'_>| {
        if pkt.parse_l4() < 0 {
            return;
        }
        if pkt.set_ipv4_src(public_ip).is_err() {
            return;
        }
        if hwcsum {
            pkt.request_hw_checksums();
        } else if csum {
            pkt.recalculate_checksums();
        }
    })?;
    system.add_sender(outbound, p_pub)?;

    // Public → private: restore the destination
    let inbound = system.add_receiver(p_pub)?;
    let private_ip = nat.private_ip;
    let inbound = system.add_handler(inbound, move |pkt: &mut Packet<'_>| {
        if pkt.parse_l4() < 0 {
            return;
        }
        if pkt.set_ipv4_dst(private_ip).is_err() {
            return;
        }
        if hwcsum {
            pkt.request_hw_checksums();
        } else if csum {
            pkt.recalculate_checksums();
        }
    })?;
    system.add_sender(inbound, p_priv)?;

    let stop = system.stop_handle();
    flux_demos::install_sigint(stop.clone());
    let stats = system.stats();

    // Demo traffic: a private host talking out, replies coming back
    let feeder = {
        let stop = stop.clone();
        let private_ip = nat.private_ip;
        std::thread::spawn(move || {
            while !stop.is_stopped() {
                let mut buf = PacketBuffer::empty();
                let mut pkt = Packet::new(&mut buf);
                pkt.init_ipv4_udp(64).expect("frame fits");
                pkt.set_ipv4_src(private_ip).expect("parsed");
                pkt.set_ipv4_dst(Ipv4Addr::new(93, 184, 216, 34)).expect("parsed");
                pkt.set_dst_port(53).expect("parsed");
                priv_handle.inject(buf.data().to_vec());
                while pub_handle.pop_transmitted().is_some() {}
                while priv_handle.pop_transmitted().is_some() {}
                std::thread::sleep(Duration::from_micros(500));
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
