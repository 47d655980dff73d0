#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub(crate) major_ver: u16,
    pub(crate) minor_ver: u16,
}

impl ProtocolVersion {
    pub fn current() -> ProtocolVersion {
        ProtocolVersion {
            major_ver: 2,
            minor_ver: 0,
        }
    }
    pub fn new(major_ver: u16, minor_ver: u16) -> ProtocolVersion {
        ProtocolVersion {
            major_ver,
            minor_ver,
        }
    }
    pub fn version_tuple(&self) -> (u16, u16) {
        (self.major_ver, self.minor_ver)
    }
    /// Whether the negotiated version is one this implementation speaks.
    pub fn is_supported(&self) -> bool {
        self.major_ver == 2
    }
    pub fn is_at_least(&self, major_ver: u16, minor_ver: u16) -> bool {
        self.major_ver > major_ver || self.major_ver == major_ver && self.minor_ver >= minor_ver
    }
    pub fn is_at_most(&self, major_ver: u16, minor_ver: u16) -> bool {
        self.major_ver < major_ver || self.major_ver == major_ver && self.minor_ver <= minor_ver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering() {
        let v = ProtocolVersion::new(2, 0);
        assert!(v.is_supported());
        assert!(v.is_at_least(2, 0));
        assert!(!v.is_at_least(2, 1));
        assert!(v.is_at_most(2, 0));
        assert!(v.is_at_most(3, 0));
        assert!(!ProtocolVersion::new(1, 0).is_supported());
        assert!(!ProtocolVersion::new(3, 0).is_supported());
    }
}
