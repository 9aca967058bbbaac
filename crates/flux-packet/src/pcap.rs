//! pcap file codec
//!
//! Nanosecond-resolution pcap (magic `0xa1b23c4d`), every field
//! little-endian. One 24-byte global header, then records of a 16-byte
//! header plus `incl_len` raw octets. The writer's clock is injectable
//! so tests get byte-exact output.

use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// Magic for nanosecond-timestamp pcap files
pub const PCAP_NSEC_MAGIC: u32 = 0xa1b2_3c4d;
/// Size of the global header in octets
pub const PCAP_GLOBAL_HDR_SIZE: usize = 24;
/// Size of a record header in octets
pub const PCAP_RECORD_HDR_SIZE: usize = 16;
/// Snap length written into the global header
pub const PCAP_SNAPLEN: u32 = 65535;
/// Link type: Ethernet
pub const PCAP_LINKTYPE_ETHERNET: u32 = 1;

/// Clock used for record timestamps: (seconds, nanoseconds-in-second)
pub type PcapClock = fn() -> (u32, u32);

fn system_clock() -> (u32, u32) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs() as u32, now.subsec_nanos())
}

/// pcap global header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapGlobalHeader {
    /// Magic number
    pub magic: u32,
    /// Major version
    pub version_major: u16,
    /// Minor version
    pub version_minor: u16,
    /// GMT to local correction
    pub thiszone: i32,
    /// Timestamp accuracy
    pub sigfigs: u32,
    /// Max captured length per packet
    pub snaplen: u32,
    /// Data link type
    pub network: u32,
}

impl Default for PcapGlobalHeader {
    fn default() -> Self {
        Self {
            magic: PCAP_NSEC_MAGIC,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: PCAP_SNAPLEN,
            network: PCAP_LINKTYPE_ETHERNET,
        }
    }
}

/// One decoded capture record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcapRecord {
    /// Timestamp seconds
    pub ts_sec: u32,
    /// Timestamp nanoseconds within the second
    pub ts_nsec: u32,
    /// Original on-wire length (captured length is `data.len()`)
    pub orig_len: u32,
    /// Captured octets
    pub data: Vec<u8>,
}

/// pcap stream writer
pub struct PcapWriter<W: Write> {
    inner: W,
    clock: PcapClock,
}

impl<W: Write> PcapWriter<W> {
    /// Writer over `inner` using the system clock
    pub fn new(inner: W) -> Self {
        Self::with_clock(inner, system_clock)
    }

    /// Writer with an explicit timestamp source
    pub fn with_clock(inner: W, clock: PcapClock) -> Self {
        Self { inner, clock }
    }

    /// Emit the global header. Call once, before any packet.
    pub fn write_global_header(&mut self) -> io::Result<()> {
        let h = PcapGlobalHeader::default();
        let mut buf = [0u8; PCAP_GLOBAL_HDR_SIZE];
        buf[0..4].copy_from_slice(&h.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&h.version_major.to_le_bytes());
        buf[6..8].copy_from_slice(&h.version_minor.to_le_bytes());
        buf[8..12].copy_from_slice(&h.thiszone.to_le_bytes());
        buf[12..16].copy_from_slice(&h.sigfigs.to_le_bytes());
        buf[16..20].copy_from_slice(&h.snaplen.to_le_bytes());
        buf[20..24].copy_from_slice(&h.network.to_le_bytes());
        self.inner.write_all(&buf)
    }

    /// Append one packet record with the current clock reading
    pub fn write_packet(&mut self, bytes: &[u8]) -> io::Result<()> {
        let (sec, nsec) = (self.clock)();
        let mut hdr = [0u8; PCAP_RECORD_HDR_SIZE];
        hdr[0..4].copy_from_slice(&sec.to_le_bytes());
        hdr[4..8].copy_from_slice(&nsec.to_le_bytes());
        hdr[8..12].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        hdr[12..16].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.inner.write_all(&hdr)?;
        self.inner.write_all(bytes)
    }

    /// Flush the underlying writer
    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    /// Unwrap the inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// pcap stream reader
pub struct PcapReader<R: Read> {
    inner: R,
}

impl<R: Read> PcapReader<R> {
    /// Reader over `inner`; the global header has not been consumed yet
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Consume and return the global header
    pub fn read_global_header(&mut self) -> io::Result<PcapGlobalHeader> {
        let mut buf = [0u8; PCAP_GLOBAL_HDR_SIZE];
        self.inner.read_exact(&mut buf)?;
        Ok(PcapGlobalHeader {
            magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            version_major: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            version_minor: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            thiszone: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            sigfigs: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            snaplen: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            network: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        })
    }

    /// Read one record. `Ok(None)` on a clean end of stream; a record
    /// header or body cut short is an error.
    pub fn read_packet(&mut self) -> io::Result<Option<PcapRecord>> {
        let mut hdr = [0u8; PCAP_RECORD_HDR_SIZE];
        let mut got = 0;
        while got < hdr.len() {
            match self.inner.read(&mut hdr[got..])? {
                0 if got == 0 => return Ok(None),
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated pcap record header",
                    ))
                }
                n => got += n,
            }
        }
        let ts_sec = u32::from_le_bytes(hdr[0..4].try_into().unwrap());
        let ts_nsec = u32::from_le_bytes(hdr[4..8].try_into().unwrap());
        let incl_len = u32::from_le_bytes(hdr[8..12].try_into().unwrap());
        let orig_len = u32::from_le_bytes(hdr[12..16].try_into().unwrap());

        let mut data = vec![0u8; incl_len as usize];
        self.inner.read_exact(&mut data).map_err(|_| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "truncated pcap record body")
        })?;
        Ok(Some(PcapRecord {
            ts_sec,
            ts_nsec,
            orig_len,
            data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fixed_clock() -> (u32, u32) {
        (1_700_000_000, 123_456_789)
    }

    #[test]
    fn test_global_header_bytes() {
        let mut w = PcapWriter::with_clock(Vec::new(), fixed_clock);
        w.write_global_header().unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), PCAP_GLOBAL_HDR_SIZE);
        assert_eq!(&bytes[0..4], &[0x4d, 0x3c, 0xb2, 0xa1]);
        assert_eq!(&bytes[4..8], &[2, 0, 4, 0]);
        assert_eq!(&bytes[16..20], &0xFFFFu32.to_le_bytes());
        assert_eq!(&bytes[20..24], &1u32.to_le_bytes());
    }

    #[test]
    fn test_roundtrip_in_order() {
        let packets: Vec<Vec<u8>> = (0..1000u32)
            .map(|i| {
                let n = 20 + (i as usize * 7) % 1480;
                (0..n).map(|j| (i as usize + j) as u8).collect()
            })
            .collect();

        let mut w = PcapWriter::with_clock(Vec::new(), fixed_clock);
        w.write_global_header().unwrap();
        for p in &packets {
            w.write_packet(p).unwrap();
        }

        let mut r = PcapReader::new(Cursor::new(w.into_inner()));
        let gh = r.read_global_header().unwrap();
        assert_eq!(gh, PcapGlobalHeader::default());

        for p in &packets {
            let rec = r.read_packet().unwrap().unwrap();
            assert_eq!(&rec.data, p);
            assert_eq!(rec.orig_len as usize, p.len());
            assert_eq!(rec.ts_sec, 1_700_000_000);
            assert_eq!(rec.ts_nsec, 123_456_789);
        }
        assert!(r.read_packet().unwrap().is_none());
    }

    #[test]
    fn test_short_record_header_is_error() {
        let mut w = PcapWriter::with_clock(Vec::new(), fixed_clock);
        w.write_global_header().unwrap();
        w.write_packet(&[1, 2, 3]).unwrap();
        let mut bytes = w.into_inner();
        bytes.truncate(PCAP_GLOBAL_HDR_SIZE + 7);

        let mut r = PcapReader::new(Cursor::new(bytes));
        r.read_global_header().unwrap();
        assert!(r.read_packet().is_err());
    }

    #[test]
    fn test_short_record_body_is_error() {
        let mut w = PcapWriter::with_clock(Vec::new(), fixed_clock);
        w.write_global_header().unwrap();
        w.write_packet(&[0xAB; 64]).unwrap();
        let mut bytes = w.into_inner();
        bytes.truncate(bytes.len() - 10);

        let mut r = PcapReader::new(Cursor::new(bytes));
        r.read_global_header().unwrap();
        assert!(r.read_packet().is_err());
    }
}
