//! Byte codec: request text to packet, hex for logs, whitening (XOR 0xAA).

/// Whitening byte used by the walker protocol on the wire.
pub const WHITEN_XOR: u8 = 0xAA;

/// Raw bytes in transit between relay stages. No structure beyond octets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet(Vec<u8>);

impl Packet {
    pub fn empty() -> Self {
        Packet(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex of the payload, for log lines.
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl From<Vec<u8>> for Packet {
    fn from(bytes: Vec<u8>) -> Self {
        Packet(bytes)
    }
}

impl From<&[u8]> for Packet {
    fn from(bytes: &[u8]) -> Self {
        Packet(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Decode free-form request text into bytes.
///
/// Hex is preferred: after dropping whitespace, the text must be nothing but hex digits,
/// an even count of at least two. Otherwise each run of decimal digits becomes one byte,
/// masked to 8 bits (`300` becomes `44`). Anything else decodes to an empty packet.
pub fn decode_text(input: &str) -> Packet {
    let s = input.trim();
    if s.is_empty() {
        return Packet::empty();
    }
    if let Some(bytes) = decode_hex_strict(s) {
        return Packet(bytes);
    }
    Packet(decimal_runs(s))
}

fn decode_hex_strict(s: &str) -> Option<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    if digits.len() < 2 || digits.len() % 2 != 0 {
        return None;
    }
    hex::decode(digits).ok()
}

fn decimal_runs(s: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut acc: Option<u8> = None;
    for c in s.chars() {
        match c.to_digit(10) {
            // mod 256 per digit so long runs never overflow
            Some(d) => {
                let v = acc.unwrap_or(0);
                acc = Some(v.wrapping_mul(10).wrapping_add(d as u8));
            }
            None => {
                if let Some(v) = acc.take() {
                    out.push(v);
                }
            }
        }
    }
    if let Some(v) = acc {
        out.push(v);
    }
    out
}

/// Lowercase hex, two characters per byte, no separators.
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// XOR every byte with [`WHITEN_XOR`]. Length-preserving.
pub fn whiten(bytes: &[u8]) -> Packet {
    Packet(bytes.iter().map(|b| b ^ WHITEN_XOR).collect())
}

/// Whitening is its own inverse.
pub fn unwhiten(bytes: &[u8]) -> Packet {
    whiten(bytes)
}
