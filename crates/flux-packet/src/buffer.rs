//! Packet buffer
//!
//! A fixed-capacity octet region with reserved headroom for header
//! prepends. Resizing adjusts headroom/tailroom and never copies the
//! payload.

use bitflags::bitflags;

/// Capacity of every buffer in the pool, including headroom
pub const BUFFER_SIZE: usize = 2048;

/// Headroom reserved at reset for encapsulation prepends
pub const DEFAULT_HEADROOM: usize = 128;

bitflags! {
    /// Hardware offload state and requests carried with a buffer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OffloadFlags: u16 {
        /// NIC verified the IPv4 header checksum on receive
        const IPV4_CSUM_DONE = 0x0001;
        /// NIC verified the L4 checksum on receive
        const L4_CSUM_DONE = 0x0002;
        /// Request IPv4 header checksum insertion on transmit
        const TX_IPV4_CSUM = 0x0010;
        /// Request TCP checksum insertion on transmit
        const TX_TCP_CSUM = 0x0020;
        /// Request UDP checksum insertion on transmit
        const TX_UDP_CSUM = 0x0040;
    }
}

/// One fixed-size packet buffer
///
/// Cache-line aligned; the data region is preceded by a small metadata
/// block so a handle dereference touches one line before the bytes.
#[repr(C, align(64))]
pub struct PacketBuffer {
    /// Offset of the first data byte within `data`
    headroom: u16,
    /// Length of the packet data
    len: u16,
    /// Offload flags
    flags: OffloadFlags,
    /// Opaque per-packet cookie owned by the driver layer
    cookie: u64,
    /// Raw octets
    data: [u8; BUFFER_SIZE],
}

impl PacketBuffer {
    /// A detached, zeroed buffer. Pipeline buffers always come from the
    /// pool; this is for codec tooling and tests.
    pub const fn empty() -> Self {
        Self {
            headroom: DEFAULT_HEADROOM as u16,
            len: 0,
            flags: OffloadFlags::empty(),
            cookie: 0,
            data: [0; BUFFER_SIZE],
        }
    }

    /// Packet bytes
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        let start = self.headroom as usize;
        &self.data[start..start + self.len as usize]
    }

    /// Packet bytes, mutable
    #[inline(always)]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let start = self.headroom as usize;
        &mut self.data[start..start + self.len as usize]
    }

    /// Current data length
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// True when no data bytes are present
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes available in front of the data
    #[inline(always)]
    pub fn headroom(&self) -> usize {
        self.headroom as usize
    }

    /// Bytes available behind the data
    #[inline(always)]
    pub fn tailroom(&self) -> usize {
        BUFFER_SIZE - self.headroom as usize - self.len as usize
    }

    /// Grow the packet at the front, consuming headroom.
    /// Returns the newly exposed bytes, or `None` if headroom is short.
    #[inline]
    pub fn prepend(&mut self, n: usize) -> Option<&mut [u8]> {
        if (self.headroom as usize) < n {
            return None;
        }
        self.headroom -= n as u16;
        self.len += n as u16;
        let start = self.headroom as usize;
        Some(&mut self.data[start..start + n])
    }

    /// Grow the packet at the back, consuming tailroom.
    /// Returns the newly exposed bytes, or `None` if tailroom is short.
    #[inline]
    pub fn append(&mut self, n: usize) -> Option<&mut [u8]> {
        if self.tailroom() < n {
            return None;
        }
        let start = self.headroom as usize + self.len as usize;
        self.len += n as u16;
        Some(&mut self.data[start..start + n])
    }

    /// Shrink the packet at the front, releasing bytes to headroom.
    #[inline]
    pub fn pull(&mut self, n: usize) -> bool {
        if (self.len as usize) < n {
            return false;
        }
        self.headroom += n as u16;
        self.len -= n as u16;
        true
    }

    /// Shrink the packet at the back, releasing bytes to tailroom.
    #[inline]
    pub fn trim(&mut self, n: usize) -> bool {
        if (self.len as usize) < n {
            return false;
        }
        self.len -= n as u16;
        true
    }

    /// Replace the contents with `bytes` (truncated to capacity minus
    /// default headroom). Used by RX paths and the pcap replay port.
    #[inline]
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        self.reset();
        let n = bytes.len().min(BUFFER_SIZE - DEFAULT_HEADROOM);
        self.len = n as u16;
        let start = self.headroom as usize;
        self.data[start..start + n].copy_from_slice(&bytes[..n]);
        n
    }

    /// Offload flags
    #[inline(always)]
    pub fn flags(&self) -> OffloadFlags {
        self.flags
    }

    /// Mutable offload flags
    #[inline(always)]
    pub fn flags_mut(&mut self) -> &mut OffloadFlags {
        &mut self.flags
    }

    /// Driver cookie
    #[inline(always)]
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Set the driver cookie
    #[inline(always)]
    pub fn set_cookie(&mut self, cookie: u64) {
        self.cookie = cookie;
    }

    /// Reset to an empty buffer with default headroom
    #[inline]
    pub fn reset(&mut self) {
        self.headroom = DEFAULT_HEADROOM as u16;
        self.len = 0;
        self.flags = OffloadFlags::empty();
        self.cookie = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepend_append() {
        let mut buf = PacketBuffer::empty();
        buf.append(100).unwrap();
        assert_eq!(buf.len(), 100);

        let hdr = buf.prepend(14).unwrap();
        assert_eq!(hdr.len(), 14);
        assert_eq!(buf.len(), 114);
        assert_eq!(buf.headroom(), DEFAULT_HEADROOM - 14);
    }

    #[test]
    fn test_prepend_exhausts_headroom() {
        let mut buf = PacketBuffer::empty();
        assert!(buf.prepend(DEFAULT_HEADROOM).is_some());
        assert!(buf.prepend(1).is_none());
    }

    #[test]
    fn test_pull_trim() {
        let mut buf = PacketBuffer::empty();
        buf.append(60).unwrap();
        assert!(buf.pull(14));
        assert!(buf.trim(6));
        assert_eq!(buf.len(), 40);
        assert!(!buf.pull(41));
        assert!(!buf.trim(41));
    }

    #[test]
    fn test_fill_resets_state() {
        let mut buf = PacketBuffer::empty();
        buf.flags_mut().insert(OffloadFlags::TX_UDP_CSUM);
        buf.set_cookie(7);
        let n = buf.fill(&[1, 2, 3, 4]);
        assert_eq!(n, 4);
        assert_eq!(buf.data(), &[1, 2, 3, 4]);
        assert!(buf.flags().is_empty());
        assert_eq!(buf.cookie(), 0);
    }

    #[test]
    fn test_fill_truncates_to_capacity() {
        let mut buf = PacketBuffer::empty();
        let big = vec![0xAB; BUFFER_SIZE * 2];
        let n = buf.fill(&big);
        assert_eq!(n, BUFFER_SIZE - DEFAULT_HEADROOM);
        assert_eq!(buf.tailroom(), 0);
    }
}
