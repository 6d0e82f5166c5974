//! Wrapper types around Bitvec.
use bitvec::prelude::*;

/// Bitfield where index = piece.
pub type Bitfield = BitVec<u8, Msb0>;

pub trait RltBitfield {
    /// A zeroed bitfield of `len` bits.
    fn from_piece(len: usize) -> Bitfield {
        bitvec![u8, Msb0; 0; len]
    }

    /// Build a bitfield from a wire payload, trimming the spare bits of the
    /// last byte so the length is exactly `len` bits.
    fn from_payload(payload: Vec<u8>, len: usize) -> Bitfield {
        let mut s = Bitfield::from_vec(payload);
        s.resize(len, false);
        s
    }

    /// Read the bit at `index`, false when out of range.
    fn safe_get(&self, index: usize) -> bool;
}

impl RltBitfield for Bitfield {
    fn safe_get(&self, index: usize) -> bool {
        self.get(index).map(|b| *b).unwrap_or(false)
    }
}
