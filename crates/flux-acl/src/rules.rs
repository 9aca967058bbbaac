//! Rule model and the line-oriented config format
//!
//! One rule per line: `src_cidr dst_cidr proto sport_range dport_range
//! label`. `#` starts a comment, blank lines are skipped, `any` (or `*`)
//! wildcards a field. Port ranges are `lo:hi` inclusive, or a single
//! port.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use flux_common::{FluxError, FluxResult};
use flux_packet::packet::{Packet, IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP};

/// Address prefix match (v4 or v6), or wildcard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CidrMatch {
    /// Matches every address
    Any,
    /// IPv4 prefix
    V4 {
        /// Network address bits
        net: u32,
        /// Prefix mask
        mask: u32,
    },
    /// IPv6 prefix
    V6 {
        /// Network address bits
        net: u128,
        /// Prefix mask
        mask: u128,
    },
}

impl CidrMatch {
    fn matches(&self, addr: IpAddr) -> bool {
        match (self, addr) {
            (CidrMatch::Any, _) => true,
            (CidrMatch::V4 { net, mask }, IpAddr::V4(a)) => u32::from(a) & mask == *net,
            (CidrMatch::V6 { net, mask }, IpAddr::V6(a)) => u128::from(a) & mask == *net,
            _ => false,
        }
    }

    fn parse(field: &str) -> Result<Self, String> {
        if is_wildcard(field) {
            return Ok(CidrMatch::Any);
        }
        let (addr, prefix) = match field.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (field, None),
        };
        if let Ok(a) = addr.parse::<Ipv4Addr>() {
            let bits: u32 = match prefix {
                Some(p) => p.parse().map_err(|_| format!("bad prefix {p:?}"))?,
                None => 32,
            };
            if bits > 32 {
                return Err(format!("v4 prefix /{bits} out of range"));
            }
            let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            return Ok(CidrMatch::V4 {
                net: u32::from(a) & mask,
                mask,
            });
        }
        if let Ok(a) = addr.parse::<Ipv6Addr>() {
            let bits: u32 = match prefix {
                Some(p) => p.parse().map_err(|_| format!("bad prefix {p:?}"))?,
                None => 128,
            };
            if bits > 128 {
                return Err(format!("v6 prefix /{bits} out of range"));
            }
            let mask = if bits == 0 {
                0
            } else {
                u128::MAX << (128 - bits)
            };
            return Ok(CidrMatch::V6 {
                net: u128::from(a) & mask,
                mask,
            });
        }
        Err(format!("bad address {addr:?}"))
    }
}

/// L4 protocol match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoMatch {
    /// Matches every protocol
    Any,
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP (v4 or v6)
    Icmp,
}

impl ProtoMatch {
    fn matches(&self, proto: u8) -> bool {
        match self {
            ProtoMatch::Any => true,
            ProtoMatch::Tcp => proto == IPPROTO_TCP,
            ProtoMatch::Udp => proto == IPPROTO_UDP,
            ProtoMatch::Icmp => proto == IPPROTO_ICMP || proto == IPPROTO_ICMPV6,
        }
    }

    fn parse(field: &str) -> Result<Self, String> {
        if is_wildcard(field) {
            return Ok(ProtoMatch::Any);
        }
        match field.to_ascii_lowercase().as_str() {
            "tcp" => Ok(ProtoMatch::Tcp),
            "udp" => Ok(ProtoMatch::Udp),
            "icmp" => Ok(ProtoMatch::Icmp),
            other => Err(format!("unknown protocol {other:?}")),
        }
    }
}

/// Inclusive port range; `0:65535` (or `any`) matches everything,
/// including packets without ports (ICMP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    /// Lower bound
    pub lo: u16,
    /// Upper bound
    pub hi: u16,
}

impl PortRange {
    const ANY: Self = Self { lo: 0, hi: u16::MAX };

    fn is_any(&self) -> bool {
        self.lo == 0 && self.hi == u16::MAX
    }

    fn matches(&self, port: Option<u16>) -> bool {
        match port {
            Some(p) => self.lo <= p && p <= self.hi,
            // Portless protocols only pass a wildcard range
            None => self.is_any(),
        }
    }

    fn parse(field: &str) -> Result<Self, String> {
        if is_wildcard(field) {
            return Ok(Self::ANY);
        }
        let (lo, hi) = match field.split_once(':') {
            Some((lo, hi)) => (lo, hi),
            None => (field, field),
        };
        let lo: u16 = lo.parse().map_err(|_| format!("bad port {lo:?}"))?;
        let hi: u16 = hi.parse().map_err(|_| format!("bad port {hi:?}"))?;
        if lo > hi {
            return Err(format!("reversed port range {lo}:{hi}"));
        }
        Ok(Self { lo, hi })
    }
}

/// One classification rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Source prefix
    pub src: CidrMatch,
    /// Destination prefix
    pub dst: CidrMatch,
    /// L4 protocol
    pub proto: ProtoMatch,
    /// Source port range
    pub sport: PortRange,
    /// Destination port range
    pub dport: PortRange,
    /// Output label (0 is reserved for "no match")
    pub label: u32,
}

/// Ordered, immutable rule list
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Load rules from a file
    pub fn load<P: AsRef<Path>>(path: P) -> FluxResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse rules from text
    pub fn parse(text: &str) -> FluxResult<Self> {
        let mut rules = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = match raw.split_once('#') {
                Some((before, _)) => before,
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            rules.push(parse_rule(line).map_err(|reason| FluxError::RuleParse {
                line: idx + 1,
                reason,
            })?);
        }
        Ok(Self { rules })
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are loaded
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rules, in match order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First-match classification. Parses the packet as far as needed;
    /// an unparseable packet yields label 0 without raising.
    pub fn classify(&self, pkt: &mut Packet<'_>) -> u32 {
        if pkt.parse_l3() < 0 {
            return 0;
        }
        let (src, dst) = match (pkt.ipv4_src(), pkt.ipv4_dst()) {
            (Some(s), Some(d)) => (IpAddr::V4(s), IpAddr::V4(d)),
            _ => match (pkt.ipv6_src(), pkt.ipv6_dst()) {
                (Some(s), Some(d)) => (IpAddr::V6(s), IpAddr::V6(d)),
                _ => return 0,
            },
        };
        let proto = match pkt.ip_proto() {
            Some(p) => p,
            None => return 0,
        };
        // Ports are only present once L4 parses; a negative offset
        // leaves them None and only wildcard ranges can match.
        pkt.parse_l4();
        let sport = pkt.src_port();
        let dport = pkt.dst_port();

        for rule in &self.rules {
            if rule.src.matches(src)
                && rule.dst.matches(dst)
                && rule.proto.matches(proto)
                && rule.sport.matches(sport)
                && rule.dport.matches(dport)
            {
                return rule.label;
            }
        }
        0
    }
}

fn parse_rule(line: &str) -> Result<Rule, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(format!("expected 6 fields, got {}", fields.len()));
    }
    Ok(Rule {
        src: CidrMatch::parse(fields[0])?,
        dst: CidrMatch::parse(fields[1])?,
        proto: ProtoMatch::parse(fields[2])?,
        sport: PortRange::parse(fields[3])?,
        dport: PortRange::parse(fields[4])?,
        label: fields[5]
            .parse()
            .map_err(|_| format!("bad label {:?}", fields[5]))?,
    })
}

fn is_wildcard(field: &str) -> bool {
    field == "*" || field.eq_ignore_ascii_case("any")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_line() {
        let set = RuleSet::parse("10.0.0.0/8 192.168.1.0/24 tcp 1024:65535 443 7\n").unwrap();
        assert_eq!(set.len(), 1);
        let r = &set.rules()[0];
        assert_eq!(r.label, 7);
        assert_eq!(r.dport, PortRange { lo: 443, hi: 443 });
        assert_eq!(r.proto, ProtoMatch::Tcp);
    }

    #[test]
    fn test_parse_comments_and_blanks() {
        let set = RuleSet::parse(
            "# header comment\n\
             \n\
             any any udp any 53 1  # dns\n",
        )
        .unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let err = RuleSet::parse("any any udp any 53 1\nany any frob any any 2\n").unwrap_err();
        match err {
            FluxError::RuleParse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!(RuleSet::parse("any any udp any 53\n").is_err()); // 5 fields
        assert!(RuleSet::parse("any any udp any 90:80 1\n").is_err()); // reversed
        assert!(RuleSet::parse("1.2.3.4/40 any udp any any 1\n").is_err()); // prefix
    }

    #[test]
    fn test_v6_prefix() {
        let m = CidrMatch::parse("2001:db8::/32").unwrap();
        assert!(m.matches("2001:db8::1".parse().unwrap()));
        assert!(!m.matches("2001:db9::1".parse().unwrap()));
    }

    #[test]
    fn test_zero_prefix_matches_all() {
        let m = CidrMatch::parse("0.0.0.0/0").unwrap();
        assert!(m.matches("255.255.255.255".parse().unwrap()));
    }
}
