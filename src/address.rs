use core::fmt;

/// Bluetooth device address (`BD_ADDR`) of a remote A2DP peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    /// Address of a slot that has not seen a discovery yet
    pub const UNSET: Self = Self([0; 6]);

    /// Create a new peer address from bytes
    #[must_use]
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl From<[u8; 6]> for PeerAddress {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<PeerAddress> for [u8; 6] {
    fn from(addr: PeerAddress) -> Self {
        addr.0
    }
}

impl From<PeerAddress> for bt_hci::param::BdAddr {
    fn from(addr: PeerAddress) -> Self {
        bt_hci::param::BdAddr::new(addr.0)
    }
}

impl From<bt_hci::param::BdAddr> for PeerAddress {
    fn from(bd_addr: bt_hci::param::BdAddr) -> Self {
        let mut addr = [0u8; 6];
        addr.copy_from_slice(bd_addr.raw());
        Self(addr)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::string::ToString;

    #[test]
    fn test_peer_address_display() {
        let addr = PeerAddress::new([0x0A, 0xB1, 0x2C, 0xD3, 0x4E, 0xF5]);
        assert_eq!(addr.to_string(), "0A:B1:2C:D3:4E:F5");
    }

    #[test]
    fn test_peer_address_default() {
        assert_eq!(PeerAddress::default(), PeerAddress::UNSET);
        assert_eq!(PeerAddress::UNSET.as_bytes(), &[0; 6]);
    }

    #[test]
    fn test_peer_address_bd_addr_conversion() {
        let bytes = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
        let addr = PeerAddress::from(bytes);

        let bd_addr: bt_hci::param::BdAddr = addr.into();
        assert_eq!(bd_addr.raw(), bytes);

        let back = PeerAddress::from(bd_addr);
        assert_eq!(back, addr);

        let raw: [u8; 6] = back.into();
        assert_eq!(raw, bytes);
    }
}
