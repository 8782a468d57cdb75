//! Disassembler over the decode tables.
//!
//! A pure function from a byte sequence to `(mnemonic, length)` pairs.
//! Unknown bytes come back as `"???"` with a best-guess length; the
//! disassembler never fails.

use crate::decode::{Decoder, decoder};
use crate::state::Opcode;

/// Disassemble a byte sequence.
///
/// Each returned pair is the substituted mnemonic and the encoded length
/// of the instruction (which may exceed the bytes actually remaining at
/// the end of a truncated sequence).
#[must_use]
pub fn disassemble(bytes: &[u8]) -> Vec<(String, usize)> {
    let d = decoder();
    let mut out = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let (template, length) = decode_one(d, rest);
        let code = substitute(template, length, rest);
        out.push((code, length));
        rest = &rest[length.min(rest.len())..];
    }
    out
}

/// Resolve the mnemonic template and length at the head of `bytes`,
/// descending through prefix placeholders. The DDCB/FDCB forms keep
/// their displacement at position 2, so the final opcode byte sits at
/// position 3.
fn decode_one(d: &Decoder, bytes: &[u8]) -> (String, usize) {
    let unknown = |len: usize| ("???".to_owned(), len);

    let b0 = bytes[0];
    let Ok(e) = d.lookup(Opcode::One(b0)) else {
        return unknown(1);
    };
    if e.length != 0 {
        return (e.mnemonic.clone(), usize::from(e.length));
    }

    let Some(&b1) = bytes.get(1) else {
        return unknown(2);
    };
    let Ok(e) = d.lookup(Opcode::Two(b0, b1)) else {
        return unknown(2);
    };
    if e.length != 0 {
        return (e.mnemonic.clone(), usize::from(e.length));
    }

    let Some(&b3) = bytes.get(3) else {
        return unknown(4);
    };
    match d.lookup(Opcode::Three(b0, b1, b3)) {
        Ok(e) => (e.mnemonic.clone(), usize::from(e.length)),
        Err(_) => unknown(4),
    }
}

/// Fill in the lowercase placeholders: `nn` is the little-endian 16-bit
/// constant ending the instruction, `n` the 8-bit constant at the end,
/// `+d` the displacement byte at position 2.
fn substitute(template: String, length: usize, bytes: &[u8]) -> String {
    let mut code = template;
    if code.contains("nn") && length <= bytes.len() {
        let data = (u16::from(bytes[length - 1]) << 8) | u16::from(bytes[length - 2]);
        code = code.replace("nn", &format!("0x{data:04X}"));
    } else if code.contains('n') && length <= bytes.len() {
        code = code.replace('n', &format!("0x{:02X}", bytes[length - 1]));
    }
    if code.contains("+d") && bytes.len() >= 3 {
        code = code.replace("+d", &format!("+0x{:02X}", bytes[2]));
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(bytes: &[u8]) -> (String, usize) {
        let mut all = disassemble(bytes);
        all.truncate(1);
        all.remove(0)
    }

    #[test]
    fn immediate_substitutions() {
        assert_eq!(one(&[0x3E, 0x42]), ("LD A,0x42".to_owned(), 2));
        assert_eq!(one(&[0x01, 0x34, 0x12]), ("LD BC,0x1234".to_owned(), 3));
        assert_eq!(one(&[0xC3, 0x00, 0x80]), ("JP 0x8000".to_owned(), 3));
    }

    #[test]
    fn plain_and_prefixed_opcodes() {
        assert_eq!(one(&[0x00]), ("NOP".to_owned(), 1));
        assert_eq!(one(&[0xCB, 0x11]), ("RL C".to_owned(), 2));
        assert_eq!(one(&[0xED, 0xB0]), ("LDIR".to_owned(), 2));
        assert_eq!(one(&[0xDD, 0xE5]), ("PUSH IX".to_owned(), 2));
    }

    #[test]
    fn index_displacements() {
        assert_eq!(
            one(&[0xDD, 0x7E, 0x05]),
            ("LD A,(IX+0x05)".to_owned(), 3)
        );
        // DDCB: displacement precedes the final opcode byte.
        assert_eq!(
            one(&[0xFD, 0xCB, 0x12, 0xC6]),
            ("SET 0,(IY+0x12)".to_owned(), 4)
        );
    }

    #[test]
    fn unknown_bytes_fall_back() {
        assert_eq!(one(&[0xDD, 0x00]), ("???".to_owned(), 2));
        assert_eq!(one(&[0xED, 0x00]), ("???".to_owned(), 2));
        assert_eq!(one(&[0xDD, 0xCB, 0x01, 0x00]), ("???".to_owned(), 4));
    }

    #[test]
    fn truncated_sequences_do_not_panic() {
        assert_eq!(one(&[0xDD]), ("???".to_owned(), 2));
        assert_eq!(one(&[0xDD, 0xCB]), ("???".to_owned(), 4));
        assert_eq!(one(&[0xDD, 0xCB, 0x01]), ("???".to_owned(), 4));
        // Operand bytes missing: the mnemonic keeps its placeholder.
        assert_eq!(one(&[0x3E]), ("LD A,n".to_owned(), 2));
    }

    #[test]
    fn multiple_instructions_in_sequence() {
        let listing = disassemble(&[0x3E, 0x42, 0x00, 0xC9]);
        let codes: Vec<&str> = listing.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(codes, ["LD A,0x42", "NOP", "RET"]);
    }

    #[test]
    fn mislabelled_ret_z_is_informational_only() {
        assert_eq!(one(&[0xC8]), ("RET NZ".to_owned(), 1));
    }

    #[test]
    fn exhaustive_sweep_never_panics() {
        for b0 in 0..=0xFFu8 {
            for b1 in [0x00u8, 0x06, 0x3F, 0x76, 0xCB, 0xFF] {
                let _ = disassemble(&[b0, b1, 0x12, 0x34]);
                let _ = disassemble(&[b0]);
                let _ = disassemble(&[b0, b1]);
            }
        }
    }
}
