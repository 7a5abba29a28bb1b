//! Packet dumps for protocol debugging, enabled with `IPMI_DEBUG=1`.

pub(crate) fn enabled() -> bool {
    std::env::var("IPMI_DEBUG")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

pub(crate) fn dump_hex(label: &str, bytes: &[u8]) {
    if !enabled() {
        return;
    }
    tracing::trace!(len = bytes.len(), "{label}: {}", hex(bytes));
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::hex;

    #[test]
    fn hex_is_space_separated() {
        assert_eq!(hex(&[0x06, 0x00, 0xff, 0x07]), "06 00 ff 07");
        assert_eq!(hex(&[]), "");
    }
}
