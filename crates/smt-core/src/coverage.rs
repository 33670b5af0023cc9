//! Source coverage bit vectors.

use std::fmt;

/// Which source positions a partial translation has consumed.
///
/// Position 0 is `<s>`; the sentence words follow. The vector is sized once
/// per sentence so structural equality is coverage equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coverage {
    bits: Vec<u64>,
    len: usize,
    first_zero: usize,
}

impl Coverage {
    /// Coverage of a sentence of `len` positions with only `<s>` consumed.
    pub fn root(len: usize) -> Self {
        let mut c = Self {
            bits: vec![0; len.div_ceil(64).max(1)],
            len,
            first_zero: 0,
        };
        c.set(0, 1);
        c
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_covered(&self, pos: usize) -> bool {
        pos < self.len && self.bits[pos / 64] & (1 << (pos % 64)) != 0
    }

    /// True if no position in `[i, j)` is covered yet.
    pub fn compatible(&self, i: usize, j: usize) -> bool {
        j <= self.len && (i..j).all(|p| !self.is_covered(p))
    }

    /// Mark `[i, j)` as covered.
    pub fn set(&mut self, i: usize, j: usize) {
        for pos in i..j.min(self.len) {
            self.bits[pos / 64] |= 1 << (pos % 64);
        }
        while self.first_zero < self.len && self.is_covered(self.first_zero) {
            self.first_zero += 1;
        }
    }

    pub fn with(&self, i: usize, j: usize) -> Self {
        let mut c = self.clone();
        c.set(i, j);
        c
    }

    /// First uncovered position, or `len` when complete.
    pub fn first_zero(&self) -> usize {
        self.first_zero
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.first_zero == self.len
    }

    /// Maximal uncovered runs `[i, j)`.
    pub fn gaps(&self) -> Vec<(usize, usize)> {
        let mut gaps = Vec::new();
        let mut start = None;
        for pos in self.first_zero..self.len {
            match (self.is_covered(pos), start) {
                (false, None) => start = Some(pos),
                (true, Some(s)) => {
                    gaps.push((s, pos));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            gaps.push((s, self.len));
        }
        gaps
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pos in 0..self.len {
            f.write_str(if self.is_covered(pos) { "1" } else { "0" })?;
        }
        Ok(())
    }
}
