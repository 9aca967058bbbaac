//! L3/L4 access-control classification
//!
//! An ordered rule list evaluated first-match-first against a packet
//! view. Every rule yields a non-negative output label; label 0 is
//! reserved for "no match" and for packets that cannot be parsed.
//! Rule sets are immutable once loaded and shared read-only by the
//! splitter/separator callbacks that consult them.

mod rules;

pub use rules::{CidrMatch, PortRange, ProtoMatch, Rule, RuleSet};

#[cfg(test)]
mod tests {
    use super::*;
    use flux_packet::buffer::PacketBuffer;
    use flux_packet::packet::Packet;
    use std::net::Ipv4Addr;

    fn udp_packet(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16) -> PacketBuffer {
        let mut buf = PacketBuffer::empty();
        let mut pkt = Packet::new(&mut buf);
        pkt.init_ipv4_udp(16).unwrap();
        pkt.set_ipv4_src(src).unwrap();
        pkt.set_ipv4_dst(dst).unwrap();
        pkt.set_src_port(sport).unwrap();
        pkt.set_dst_port(dport).unwrap();
        buf
    }

    #[test]
    fn test_first_match_wins() {
        let rules = RuleSet::parse(
            "any any udp any 100:200 7\n\
             any any udp any 150:150 9\n",
        )
        .unwrap();
        let mut buf = udp_packet(
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(2, 2, 2, 2),
            5000,
            150,
        );
        let mut pkt = Packet::new(&mut buf);
        // Both rules match; the earlier one must win.
        assert_eq!(rules.classify(&mut pkt), 7);
    }

    #[test]
    fn test_no_match_is_zero() {
        let rules = RuleSet::parse("any any tcp any any 3\n").unwrap();
        let mut buf = udp_packet(
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(2, 2, 2, 2),
            1,
            2,
        );
        let mut pkt = Packet::new(&mut buf);
        assert_eq!(rules.classify(&mut pkt), 0);
    }

    #[test]
    fn test_unparseable_is_zero() {
        let rules = RuleSet::parse("any any any any any 5\n").unwrap();
        let mut buf = PacketBuffer::empty();
        buf.append(30).unwrap();
        buf.data_mut().fill(0xFF); // not an IP frame
        let mut pkt = Packet::new(&mut buf);
        assert_eq!(rules.classify(&mut pkt), 0);
    }

    #[test]
    fn test_cidr_and_port_matching() {
        let rules = RuleSet::parse(
            "# forwarding table\n\
             192.168.0.0/16 any udp any 111:111 1\n\
             192.168.0.0/16 any udp any 222:222 2\n\
             10.0.0.0/8 any any any any 3\n",
        )
        .unwrap();

        let mut buf = udp_packet(
            Ipv4Addr::new(192, 168, 7, 9),
            Ipv4Addr::new(8, 8, 8, 8),
            4000,
            222,
        );
        let mut pkt = Packet::new(&mut buf);
        assert_eq!(rules.classify(&mut pkt), 2);

        let mut buf = udp_packet(
            Ipv4Addr::new(10, 1, 2, 3),
            Ipv4Addr::new(8, 8, 8, 8),
            4000,
            9999,
        );
        let mut pkt = Packet::new(&mut buf);
        assert_eq!(rules.classify(&mut pkt), 3);
    }
}
