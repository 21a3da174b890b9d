//! Bit vector with constant-time rank and sampled select.

const SELECT_SAMPLE: usize = 64;

/// Growable bit vector used while building succinct structures.
#[derive(Debug, Default, Clone)]
pub(crate) struct BitBuilder {
    words: Vec<u64>,
    len: usize,
}

impl BitBuilder {
    pub(crate) fn push(&mut self, bit: bool) {
        let word = self.len / 64;
        if word == self.words.len() {
            self.words.push(0);
        }
        if bit {
            self.words[word] |= 1 << (self.len % 64);
        }
        self.len += 1;
    }

    /// Set a bit that may lie beyond the current length.
    pub(crate) fn set(&mut self, idx: usize) {
        let word = idx / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (idx % 64);
        self.len = self.len.max(idx + 1);
    }

    pub(crate) fn finish(self) -> RankSelect {
        RankSelect::new(self.words, self.len)
    }
}

/// Immutable bit vector answering `get`, `rank1` and `select1`.
#[derive(Debug, Clone)]
pub(crate) struct RankSelect {
    words: Vec<u64>,
    len: usize,
    /// `ranks[w]` = number of ones in words `0..w`; one extra trailing entry.
    ranks: Vec<u32>,
    /// Word index holding every `SELECT_SAMPLE`-th one.
    samples: Vec<u32>,
}

impl RankSelect {
    fn new(words: Vec<u64>, len: usize) -> Self {
        let mut ranks = Vec::with_capacity(words.len() + 1);
        let mut samples = Vec::new();
        let mut total = 0u32;
        for (i, word) in words.iter().enumerate() {
            ranks.push(total);
            let ones = word.count_ones();
            while samples.len() * SELECT_SAMPLE < (total + ones) as usize {
                samples.push(i as u32);
            }
            total += ones;
        }
        ranks.push(total);
        Self {
            words,
            len,
            ranks,
            samples,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn get(&self, idx: usize) -> bool {
        self.words
            .get(idx / 64)
            .is_some_and(|w| w & (1 << (idx % 64)) != 0)
    }

    /// Ones in `[0, idx)`.
    pub(crate) fn rank1(&self, idx: usize) -> usize {
        let word = idx / 64;
        let Some(&base) = self.ranks.get(word) else {
            return *self.ranks.last().unwrap_or(&0) as usize;
        };
        let bit = idx % 64;
        let partial = match self.words.get(word) {
            Some(w) if bit > 0 => (w & ((1u64 << bit) - 1)).count_ones(),
            _ => 0,
        };
        base as usize + partial as usize
    }

    /// Zeros in `[0, idx)`.
    pub(crate) fn rank0(&self, idx: usize) -> usize {
        idx - self.rank1(idx)
    }

    /// Position of the `k`-th one (0-based).
    pub(crate) fn select1(&self, k: usize) -> Option<usize> {
        let total = *self.ranks.last()? as usize;
        if k >= total {
            return None;
        }
        let mut word = self.samples[k / SELECT_SAMPLE] as usize;
        while self.ranks[word + 1] as usize <= k {
            word += 1;
        }
        let mut bits = self.words[word];
        for _ in 0..(k - self.ranks[word] as usize) {
            bits &= bits - 1;
        }
        Some(word * 64 + bits.trailing_zeros() as usize)
    }

    pub(crate) fn heap_bytes(&self) -> usize {
        self.words.len() * 8 + self.ranks.len() * 4 + self.samples.len() * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(bits: &[bool]) -> RankSelect {
        let mut b = BitBuilder::default();
        for &bit in bits {
            b.push(bit);
        }
        b.finish()
    }

    #[test]
    fn rank_and_select_agree() {
        let bits: Vec<bool> = (0..1000).map(|i| i % 3 == 0 || i % 7 == 0).collect();
        let rs = build(&bits);
        assert_eq!(rs.len(), 1000);

        let mut ones = 0;
        for (i, &bit) in bits.iter().enumerate() {
            assert_eq!(rs.rank1(i), ones, "rank1({i})");
            assert_eq!(rs.get(i), bit);
            if bit {
                assert_eq!(rs.select1(ones), Some(i), "select1({ones})");
                ones += 1;
            }
        }
        assert_eq!(rs.rank1(1000), ones);
        assert_eq!(rs.select1(ones), None);
    }

    #[test]
    fn sparse_and_dense_words() {
        let mut bits = vec![false; 300];
        bits[0] = true;
        bits[299] = true;
        bits.extend(std::iter::repeat_n(true, 200));
        let rs = build(&bits);
        assert_eq!(rs.select1(0), Some(0));
        assert_eq!(rs.select1(1), Some(299));
        assert_eq!(rs.select1(2), Some(300));
        assert_eq!(rs.select1(201), Some(499));
        assert_eq!(rs.rank0(300), 298);
    }

    #[test]
    fn set_beyond_len() {
        let mut b = BitBuilder::default();
        b.set(130);
        let rs = b.finish();
        assert!(rs.get(130));
        assert!(!rs.get(129));
        assert_eq!(rs.rank1(131), 1);
    }

    #[test]
    fn empty_vector() {
        let rs = BitBuilder::default().finish();
        assert_eq!(rs.rank1(0), 0);
        assert_eq!(rs.select1(0), None);
        assert!(!rs.get(0));
    }
}
