//! Canonical hex dump (offset, 16 hex bytes, ASCII column)

use std::fmt::Write;

/// Dump `data` sixteen bytes per line, each line prefixed with `prefix`.
pub fn hex_dump(data: &[u8], prefix: &str) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 80);

    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{}{:08x}  ", prefix, line * 16);

        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
            if i == 7 {
                out.push(' ');
            }
        }

        out.push_str(" |");
        for &b in chunk {
            out.push(if (0x20..0x7f).contains(&b) { b as char } else { '.' });
        }
        out.push_str("|\n");
    }

    out
}
