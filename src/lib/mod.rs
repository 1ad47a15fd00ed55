pub mod barcode_matching;
pub mod barcode_spec;
pub mod cleanup;
pub mod demux;
pub mod extract;
pub mod layout;
pub mod paired;
pub mod router;
pub mod span;
pub mod stats;

/// Checks whether a given u8 byte is a "No-call"-ed base, signified by the bytes 'N' and 'n'
fn byte_is_nocall(byte: u8) -> bool {
    byte == b'N' || byte == b'n'
}

/// Checks whether a provided byte is an A, G, C, T or N (either case).
fn is_valid_base(byte: u8) -> bool {
    matches!(byte.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T') || byte_is_nocall(byte)
}

/// Reverse complements a barcode.  Bases other than A, C, G and T become N.
#[must_use]
pub fn reverse_complement(bases: &[u8]) -> Vec<u8> {
    bases
        .iter()
        .rev()
        .map(|b| match b.to_ascii_uppercase() {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            _ => b'N',
        })
        .collect()
}
