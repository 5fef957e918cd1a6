use std::{
    net::{IpAddr, SocketAddr, UdpSocket},
    str::FromStr,
};

use rand::Rng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn size(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 49152,
            end: 65535,
        }
    }
}

impl From<std::ops::Range<u16>> for PortRange {
    fn from(range: std::ops::Range<u16>) -> Self {
        assert!(range.start <= range.end);

        Self {
            start: range.start,
            end: range.end,
        }
    }
}

impl ToString for PortRange {
    fn to_string(&self) -> String {
        format!("{}..{}", self.start, self.end)
    }
}

#[derive(Debug)]
pub struct PortRangeParseError(String);

impl std::error::Error for PortRangeParseError {}

impl std::fmt::Display for PortRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<std::num::ParseIntError> for PortRangeParseError {
    fn from(error: std::num::ParseIntError) -> Self {
        PortRangeParseError(error.to_string())
    }
}

impl FromStr for PortRange {
    type Err = PortRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once("..")
            .ok_or(PortRangeParseError(s.to_string()))?;

        Ok(Self {
            start: start.parse()?,
            end: end.parse()?,
        })
    }
}

#[cfg(feature = "serde")]
impl Serialize for PortRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_str(&s).map_err(|e| serde::de::Error::custom(e.0))?)
    }
}

/// Bit Flag
#[derive(PartialEq, Eq)]
pub enum Bit {
    Low,
    High,
}

/// Process-wide ephemeral UDP port pool.
///
/// Each RTP/RTCP session needs one or two bound sockets, and a process
/// hosting many sessions should not rely on the OS to pick ephemeral ports
/// one bind() call at a time — this bitmap tracks the whole configured
/// range so allocation and release (on session teardown) are O(1)-ish and
/// a pair allocation can enforce the even-RTP/RTCP=RTP+1 convention
/// (RFC 3550 §11) without racing other sessions for the odd port.
///
/// # Test
///
/// ```
/// use std::collections::HashSet;
/// use rtp_session::port_allocator::*;
///
/// let mut pool = PortAllocator::default();
/// let mut ports = HashSet::with_capacity(PortAllocator::default().capacity());
///
/// while let Some(port) = pool.alloc(None) {
///     ports.insert(port);
/// }
///
/// assert_eq!(PortAllocator::default().capacity() + 1, ports.len());
/// ```
pub struct PortAllocator {
    port_range: PortRange,
    buckets: Vec<u64>,
    allocated: usize,
    bit_len: u32,
    max_offset: usize,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(PortRange::default())
    }
}

impl PortAllocator {
    pub fn new(port_range: PortRange) -> Self {
        let capacity = port_range.size();
        let bucket_size = (capacity as f32 / 64.0).ceil() as usize;

        Self {
            bit_len: (capacity as f32 % 64.0).ceil() as u32,
            buckets: vec![0; bucket_size],
            max_offset: bucket_size - 1,
            allocated: 0,
            port_range,
        }
    }

    /// get pools capacity.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::port_allocator::*;
    ///
    /// assert_eq!(PortAllocator::default().capacity(), 65535 - 49152);
    /// ```
    pub fn capacity(&self) -> usize {
        self.port_range.size()
    }

    /// get port range.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::port_allocator::*;
    ///
    /// let pool = PortAllocator::default();
    ///
    /// assert_eq!(pool.port_range().start, 49152);
    /// assert_eq!(pool.port_range().end, 65535);
    ///
    /// let pool = PortAllocator::new((50000..60000).into());
    ///
    /// assert_eq!(pool.port_range().start, 50000);
    /// assert_eq!(pool.port_range().end, 60000);
    /// ```
    pub fn port_range(&self) -> &PortRange {
        &self.port_range
    }

    /// get pools allocated size.
    ///
    /// ```
    /// use rtp_session::port_allocator::*;
    ///
    /// let mut pools = PortAllocator::default();
    /// assert_eq!(pools.len(), 0);
    ///
    /// pools.alloc(None).unwrap();
    /// assert_eq!(pools.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.allocated
    }

    /// get pools allocated size is empty.
    ///
    /// ```
    /// use rtp_session::port_allocator::*;
    ///
    /// let mut pools = PortAllocator::default();
    /// assert_eq!(pools.len(), 0);
    /// assert_eq!(pools.is_empty(), true);
    /// ```
    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    /// random assign a port.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::port_allocator::*;
    ///
    /// let mut pool = PortAllocator::default();
    ///
    /// assert_eq!(pool.alloc(Some(0)), Some(49152));
    /// assert_eq!(pool.alloc(Some(0)), Some(49153));
    ///
    /// assert!(pool.alloc(None).is_some());
    /// ```
    pub fn alloc(&mut self, start: Option<usize>) -> Option<u16> {
        let mut index = None;
        let mut offset =
            start.unwrap_or_else(|| rand::rng().random_range(0..self.max_offset) as usize);

        // When the partition lookup has gone through the entire partition list, the
        // lookup should be stopped, and the location where it should be stopped is
        // recorded here.
        let previous = if offset == 0 {
            self.max_offset
        } else {
            offset - 1
        };

        loop {
            // Finds the first high position in the partition.
            if let Some(i) = {
                let bucket = self.buckets[offset];
                if bucket < u64::MAX {
                    let idx = bucket.leading_ones();

                    // Check to see if the jump is beyond the partition list or the lookup exceeds
                    // the maximum length of the allocation table.
                    if offset == self.max_offset && idx > self.bit_len {
                        None
                    } else {
                        Some(idx)
                    }
                } else {
                    None
                }
            } {
                index = Some(i as usize);
                break;
            }

            // As long as it doesn't find it, it continues to re-find it from the next
            // partition.
            if offset == self.max_offset {
                offset = 0;
            } else {
                offset += 1;
            }

            // Already gone through all partitions, lookup failed.
            if offset == previous {
                break;
            }
        }

        // Writes to the partition, marking the current location as already allocated.
        let index = index?;
        self.set_bit(offset, index, Bit::High);
        self.allocated += 1;

        // The actual port number is calculated from the partition offset position.
        let num = (offset * 64 + index) as u16;
        let port = self.port_range.start + num;
        Some(port)
    }

    /// write bit flag in the bucket.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::port_allocator::*;
    ///
    /// let mut pool = PortAllocator::default();
    ///
    /// assert_eq!(pool.alloc(Some(0)), Some(49152));
    /// assert_eq!(pool.alloc(Some(0)), Some(49153));
    ///
    /// pool.set_bit(0, 0, Bit::High);
    /// pool.set_bit(0, 1, Bit::High);
    ///
    /// assert_eq!(pool.alloc(Some(0)), Some(49154));
    /// assert_eq!(pool.alloc(Some(0)), Some(49155));
    /// ```
    pub fn set_bit(&mut self, bucket: usize, index: usize, bit: Bit) {
        let high_mask = 1 << (63 - index);
        let mask = match bit {
            Bit::Low => u64::MAX ^ high_mask,
            Bit::High => high_mask,
        };

        let value = self.buckets[bucket];
        self.buckets[bucket] = match bit {
            Bit::High => value | mask,
            Bit::Low => value & mask,
        };
    }

    /// restore port in the buckets.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::port_allocator::*;
    ///
    /// let mut pool = PortAllocator::default();
    ///
    /// assert_eq!(pool.alloc(Some(0)), Some(49152));
    /// assert_eq!(pool.alloc(Some(0)), Some(49153));
    ///
    /// pool.restore(49152);
    /// pool.restore(49153);
    ///
    /// assert_eq!(pool.alloc(Some(0)), Some(49152));
    /// assert_eq!(pool.alloc(Some(0)), Some(49153));
    /// ```
    pub fn restore(&mut self, port: u16) {
        assert!(self.port_range.contains(port));

        // Calculate the location in the partition from the port number.
        let offset = (port - self.port_range.start) as usize;
        let bucket = offset / 64;
        let index = offset - (bucket * 64);

        // Gets the bit value in the port position in the partition, if it is low, no
        // processing is required.
        if {
            match (self.buckets[bucket] & (1 << (63 - index))) >> (63 - index) {
                0 => Bit::Low,
                1 => Bit::High,
                _ => panic!(),
            }
        } == Bit::Low
        {
            return;
        }

        self.set_bit(bucket, index, Bit::Low);
        self.allocated -= 1;
    }

    /// Binds a UDP socket on `addr`, trying `port` first if given. If the
    /// requested port is unavailable and `mandatory` is `false`, falls back
    /// to scanning the pool upward from a random offset instead of
    /// failing outright; if `mandatory` is `true`, a failure to bind the
    /// requested port is returned as an error.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::port_allocator::PortAllocator;
    /// use std::net::{IpAddr, Ipv4Addr};
    ///
    /// let mut pool = PortAllocator::default();
    /// let (_socket, port) = pool.allocate_udp(IpAddr::V4(Ipv4Addr::LOCALHOST), None, false).unwrap();
    /// assert!(pool.port_range().contains(port));
    /// ```
    pub fn allocate_udp(
        &mut self,
        addr: IpAddr,
        port: Option<u16>,
        mandatory: bool,
    ) -> std::io::Result<(UdpSocket, u16)> {
        if let Some(requested) = port {
            match UdpSocket::bind(SocketAddr::new(addr, requested)) {
                Ok(socket) => {
                    if self.port_range.contains(requested) {
                        let offset = (requested - self.port_range.start) as usize;
                        self.set_bit(offset / 64, offset % 64, Bit::High);
                        self.allocated += 1;
                    }
                    return Ok((socket, requested));
                }
                Err(err) if mandatory => return Err(err),
                Err(_) => {}
            }
        }

        loop {
            let candidate = self.alloc(None).ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "port pool exhausted")
            })?;

            match UdpSocket::bind(SocketAddr::new(addr, candidate)) {
                Ok(socket) => return Ok((socket, candidate)),
                // Something outside this allocator's bookkeeping already
                // holds this port; give the bit back and try the next one.
                Err(_) => self.restore(candidate),
            }
        }
    }

    /// Allocates an RTP/RTCP port pair per RFC 3550 §11: an even RTP port
    /// with RTCP bound to `RTP + 1`. Not needed for a session that
    /// multiplexes RTP and RTCP on a single socket (RFC 5761).
    pub fn allocate_rtp_rtcp_pair(
        &mut self,
        addr: IpAddr,
    ) -> std::io::Result<((UdpSocket, u16), (UdpSocket, u16))> {
        loop {
            let (rtp_socket, rtp_port) = self.allocate_udp(addr, None, false)?;
            if rtp_port % 2 != 0 {
                self.restore(rtp_port);
                drop(rtp_socket);
                continue;
            }

            match self.allocate_udp(addr, Some(rtp_port + 1), true) {
                Ok(rtcp) => return Ok(((rtp_socket, rtp_port), rtcp)),
                Err(_) => {
                    self.restore(rtp_port);
                    drop(rtp_socket);
                }
            }
        }
    }
}
