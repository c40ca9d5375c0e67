//! Text decoding for extracts of unknown encoding
//!
//! Source systems export either UTF-8 or a Windows code page. Valid UTF-8 runs
//! are kept as-is and every invalid byte is read as Windows-1252, so a file
//! mixing both still decodes without replacement characters.

/// Windows-1252 code points for bytes 0x80..=0x9F (0 marks an unassigned byte)
const CP1252_HIGH: [u16; 32] = [
    0x20AC, 0, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160, 0x2039,
    0x0152, 0, 0x017D, 0, 0, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014, 0x02DC,
    0x2122, 0x0161, 0x203A, 0x0153, 0, 0x017E, 0x0178,
];

fn cp1252_char(byte: u8) -> char {
    if (0x80..=0x9F).contains(&byte) {
        let code = CP1252_HIGH[(byte - 0x80) as usize];
        if code != 0 {
            if let Some(c) = char::from_u32(code as u32) {
                return c;
            }
        }
    }
    char::from(byte)
}

/// Decode bytes as UTF-8, reading invalid sequences byte-by-byte as Windows-1252
pub fn decode_text(bytes: &[u8]) -> String {
    if let Ok(valid) = std::str::from_utf8(bytes) {
        return valid.to_string();
    }

    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
        out.extend(chunk.invalid().iter().map(|b| cp1252_char(*b)));
    }
    out
}

/// Strip a leading UTF-8 byte order mark
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_passes_through() {
        assert_eq!(decode_text("Bogotá D.C.".as_bytes()), "Bogotá D.C.");
    }

    #[test]
    fn test_latin1_bytes_are_recovered() {
        // "Nariño" exported as Windows-1252
        assert_eq!(decode_text(b"Nari\xF1o"), "Nariño");
        assert_eq!(decode_text(b"\x80 100"), "€ 100");
    }

    #[test]
    fn test_mixed_encodings_decode_per_run() {
        let mut bytes = "Medellín;".as_bytes().to_vec();
        bytes.extend_from_slice(b"Ca\xF1asgordas");
        assert_eq!(decode_text(&bytes), "Medellín;Cañasgordas");
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom(b"\xEF\xBB\xBF<table>"), b"<table>");
        assert_eq!(strip_bom(b"<table>"), b"<table>");
    }
}
