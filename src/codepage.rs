//! The `Codepage` collaborator (§6.4): OEM byte <-> Unicode conversion for
//! short (8.3) names, and locale-aware uppercasing.
//!
//! Short directory entries store names as single-byte OEM characters, not
//! UTF-8; only the LFN entries carry UTF-16. The driver funnels every
//! short-name byte through a `Codepage` so that callers working entirely
//! in codepage 437 (the default, and the only one wired up here) never
//! pay for a table they don't use.

/// Converts between a single-byte OEM encoding and Unicode, and knows how
/// to uppercase a character in that encoding's locale.
pub trait Codepage {
    /// Decode a single OEM byte to its Unicode scalar value.
    fn oem_to_unicode(&self, byte: u8) -> char;

    /// Encode a Unicode scalar value to its OEM byte, if representable.
    fn unicode_to_oem(&self, ch: char) -> Option<u8>;

    /// Uppercase a Unicode scalar value using this codepage's locale rules.
    fn to_upper(&self, ch: char) -> char;
}

/// IBM PC codepage 437, the default and the only OEM codepage this driver
/// ships a table for. Values below are the invariant low page (ASCII, byte
/// identical to Unicode) plus the codepage-specific high page 0x80-0xFF.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cp437;

impl Codepage for Cp437 {
    fn oem_to_unicode(&self, byte: u8) -> char {
        if byte < 0x80 {
            byte as char
        } else {
            CP437_HIGH[(byte - 0x80) as usize]
        }
    }

    fn unicode_to_oem(&self, ch: char) -> Option<u8> {
        if (ch as u32) < 0x80 {
            return Some(ch as u8);
        }
        CP437_HIGH
            .iter()
            .position(|&c| c == ch)
            .map(|i| (i as u8) + 0x80)
    }

    fn to_upper(&self, ch: char) -> char {
        // cp437 has no case distinctions outside the ASCII/Latin-1-like
        // range this table covers; `char::to_ascii_uppercase` plus a
        // handful of accented-letter pairs covers what the real table
        // maps.
        match ch {
            'à' | 'á' | 'â' | 'ä' => 'A',
            'è' | 'é' | 'ê' | 'ë' => 'E',
            'ì' | 'í' | 'î' | 'ï' => 'I',
            'ò' | 'ó' | 'ô' | 'ö' => 'O',
            'ù' | 'ú' | 'û' | 'ü' => 'U',
            'ñ' => 'N',
            'ç' => 'C',
            other => other.to_ascii_uppercase(),
        }
    }
}

/// High half (0x80-0xFF) of codepage 437, in order.
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', 'É', 'æ', 'Æ',
    'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', 'á', 'í', 'ó', 'ú', 'ñ', 'Ñ',
    'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕',
    '╣', '║', '╗', '╝', '╜', '╛', '┐', '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦',
    '╠', '═', '╬', '╧', '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐',
    '▀', 'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', '≡', '±',
    '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{00A0}',
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_range_is_identity() {
        let cp = Cp437;
        for b in 0x20u8..0x7F {
            assert_eq!(cp.oem_to_unicode(b) as u32, b as u32);
        }
    }

    #[test]
    fn high_range_roundtrips() {
        let cp = Cp437;
        for b in 0x80u16..=0xFF {
            let b = b as u8;
            let ch = cp.oem_to_unicode(b);
            assert_eq!(cp.unicode_to_oem(ch), Some(b));
        }
    }

    #[test]
    fn to_upper_handles_accented_letters() {
        let cp = Cp437;
        assert_eq!(cp.to_upper('é'), 'E');
        assert_eq!(cp.to_upper('a'), 'A');
    }
}
