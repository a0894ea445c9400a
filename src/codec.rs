//! Transmitter id codec.
//!
//! Dexcom transmitters identify themselves with a 5-symbol id drawn from a
//! 32-symbol alphabet. The uploader reports the packed numeric form; the
//! textual form is what users type into their client URLs.

/// Radix-32 alphabet, indexed by symbol value. I, O, V and Z are excluded.
const SYMBOLS: [char; 32] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J',
    'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'W', 'X', 'Y',
];

/// Number of symbols in a transmitter id.
pub const ID_LEN: usize = 5;

/// Bit offsets of each 5-bit group, most significant first.
const SHIFTS: [u32; ID_LEN] = [20, 15, 10, 5, 0];

const GROUP_MASK: u64 = 0x1F;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Character at `position` is not part of the alphabet.
    InvalidSymbol { symbol: char, position: usize },
    /// Input did not contain exactly five symbols.
    InvalidLength(usize),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::InvalidSymbol { symbol, position } => {
                write!(f, "invalid symbol {:?} at position {}", symbol, position)
            }
            CodecError::InvalidLength(len) => {
                write!(f, "expected {} symbols, got {}", ID_LEN, len)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Encode a packed transmitter id into its textual form.
///
/// Only the low 25 bits are used; anything above is discarded. Existing
/// uploaders rely on this, so it is not treated as an error.
pub fn encode(packed: u64) -> String {
    SHIFTS
        .iter()
        .map(|shift| SYMBOLS[((packed >> shift) & GROUP_MASK) as usize])
        .collect()
}

/// Decode a textual transmitter id back to its packed form.
pub fn decode(id: &str) -> Result<u32, CodecError> {
    let len = id.chars().count();
    if len != ID_LEN {
        return Err(CodecError::InvalidLength(len));
    }

    id.chars()
        .zip(SHIFTS)
        .enumerate()
        .try_fold(0u32, |acc, (position, (symbol, shift))| {
            let value = symbol_value(symbol)
                .ok_or(CodecError::InvalidSymbol { symbol, position })?;
            Ok(acc | (value << shift))
        })
}

fn symbol_value(symbol: char) -> Option<u32> {
    SYMBOLS.iter().position(|&s| s == symbol).map(|i| i as u32)
}
