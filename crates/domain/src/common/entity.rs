use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Any,
    Other(u8),
}

impl Protocol {
    /// Convert to the IP protocol number used in flow keys.
    /// Returns 0 for Any (wildcard).
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Any => 0,
            Self::Other(n) => n,
        }
    }

    /// Create from a raw protocol number.
    pub fn from_u8(n: u8) -> Self {
        match n {
            0 => Self::Any,
            6 => Self::Tcp,
            17 => Self::Udp,
            other => Self::Other(other),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Any => "any",
            Self::Other(_) => "other",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "any" | "" => Ok(Self::Any),
            _ => Err("unknown protocol"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_roundtrip() {
        assert_eq!(Protocol::from_u8(Protocol::Tcp.to_u8()), Protocol::Tcp);
        assert_eq!(Protocol::from_u8(Protocol::Udp.to_u8()), Protocol::Udp);
        assert_eq!(Protocol::from_u8(Protocol::Any.to_u8()), Protocol::Any);
    }

    #[test]
    fn protocol_known_values() {
        assert_eq!(Protocol::Tcp.to_u8(), 6);
        assert_eq!(Protocol::Udp.to_u8(), 17);
        assert_eq!(Protocol::Any.to_u8(), 0);
    }

    #[test]
    fn protocol_other_roundtrip() {
        let proto = Protocol::Other(47); // GRE
        assert_eq!(proto.to_u8(), 47);
        assert_eq!(Protocol::from_u8(47), Protocol::Other(47));
    }

    #[test]
    fn protocol_parse() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("UDP".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert_eq!("".parse::<Protocol>().unwrap(), Protocol::Any);
        assert!("sctp".parse::<Protocol>().is_err());
    }
}
