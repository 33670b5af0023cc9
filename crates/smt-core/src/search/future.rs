use crate::coverage::Coverage;

/// Best-case cost of translating each source span, combined over splits.
///
/// Positions follow the coverage vector: 0 is `<s>`, `1..len` are words.
pub struct FutureCosts {
    len: usize,
    table: Vec<f32>,
}

impl FutureCosts {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            table: vec![f32::NEG_INFINITY; (len + 1) * (len + 1)],
        }
    }

    /// Record the best single-rule estimate for `[i, j)`.
    pub fn set(&mut self, i: usize, j: usize, cost: f32) {
        let cell = &mut self.table[i * (self.len + 1) + j];
        if cost > *cell {
            *cell = cost;
        }
    }

    /// Fill every span with the best combination of adjacent sub-spans.
    pub fn complete(mut self) -> Self {
        let n = self.len + 1;
        for width in 2..n {
            for i in 1..n - width {
                let j = i + width;
                for k in i + 1..j {
                    let split = self.table[i * n + k] + self.table[k * n + j];
                    if split > self.table[i * n + j] {
                        self.table[i * n + j] = split;
                    }
                }
            }
        }
        self
    }

    pub fn span(&self, i: usize, j: usize) -> f32 {
        self.table[i * (self.len + 1) + j]
    }

    /// Sum over the uncovered runs of `coverage`.
    pub fn estimate(&self, coverage: &Coverage) -> f32 {
        coverage.gaps().into_iter().map(|(i, j)| self.span(i, j)).sum()
    }
}
