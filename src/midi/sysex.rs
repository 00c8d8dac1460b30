//! A small static table of one-byte SysEx manufacturer IDs, used only to
//! annotate `describe()` output. Purely descriptive - it never feeds back
//! into parsing or transformation.

/// Looks up the manufacturer name for a one-byte SysEx ID (the first byte
/// following `0xF0`). Returns `None` for three-byte extended IDs (`0x00`
/// prefix) and anything not in the table.
pub fn manufacturer_name(id: u8) -> Option<&'static str> {
    match id {
        0x01 => Some("Sequential Circuits"),
        0x06 => Some("Moog"),
        0x41 => Some("Roland"),
        0x42 => Some("Korg"),
        0x43 => Some("Yamaha"),
        0x44 => Some("Casio"),
        0x47 => Some("Akai"),
        0x7D => Some("Educational / non-commercial"),
        0x7E => Some("Universal Non-Realtime"),
        0x7F => Some("Universal Realtime"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_manufacturer() {
        assert_eq!(manufacturer_name(0x41), Some("Roland"));
    }

    #[test]
    fn unknown_manufacturer() {
        assert_eq!(manufacturer_name(0x99), None);
    }
}
