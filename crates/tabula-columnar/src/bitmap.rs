#![forbid(unsafe_code)]

/// A growable bit vector used for validity masks, boolean payloads and row tombstones.
///
/// Bits are stored little-endian within each `u64` word: bit 0 is the LSB of word 0.
/// The vector tracks its population count so `count_ones` is O(1).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitVec {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

impl BitVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bits(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(bits.div_ceil(64)),
            len: 0,
            ones: 0,
        }
    }

    /// A vector of `bits` bits, all set to `value`.
    pub fn filled(bits: usize, value: bool) -> Self {
        let mut out = Self::with_capacity_bits(bits);
        out.extend_constant(bits, value);
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: bool) {
        let bit = self.len % 64;
        if bit == 0 {
            self.words.push(0);
        }
        if value {
            self.words[self.len / 64] |= 1u64 << bit;
            self.ones += 1;
        }
        self.len += 1;
    }

    /// Append `count` copies of `value`.
    pub fn extend_constant(&mut self, count: usize, value: bool) {
        // Fill the current partial word bit by bit, then whole words at once.
        let mut remaining = count;
        while remaining > 0 && self.len % 64 != 0 {
            self.push(value);
            remaining -= 1;
        }
        while remaining >= 64 {
            self.words.push(if value { u64::MAX } else { 0 });
            self.len += 64;
            if value {
                self.ones += 64;
            }
            remaining -= 64;
        }
        for _ in 0..remaining {
            self.push(value);
        }
    }

    /// Returns the bit at `index`; out-of-range reads are `false`.
    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    pub fn set(&mut self, index: usize, value: bool) {
        debug_assert!(index < self.len, "BitVec index out of bounds");
        let word = &mut self.words[index / 64];
        let mask = 1u64 << (index % 64);
        let was_set = *word & mask != 0;
        match (was_set, value) {
            (true, false) => {
                *word &= !mask;
                self.ones -= 1;
            }
            (false, true) => {
                *word |= mask;
                self.ones += 1;
            }
            _ => {}
        }
    }

    pub fn count_ones(&self) -> usize {
        self.ones
    }

    pub fn count_zeros(&self) -> usize {
        self.len - self.ones
    }

    pub fn all_true(&self) -> bool {
        self.ones == self.len
    }

    /// Iterate the indices of set bits in increasing order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(move |(word_idx, &word)| {
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some(word_idx * 64 + tz)
                })
            })
            .take_while(move |&idx| idx < self.len)
    }

    /// Keep only the bits whose position is set in `keep`, preserving order.
    pub fn retain_by(&self, keep: &BitVec) -> BitVec {
        let mut out = BitVec::with_capacity_bits(keep.count_ones());
        for idx in keep.iter_ones() {
            out.push(self.get(idx));
        }
        out
    }
}
