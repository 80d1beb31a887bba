/// Fixed 1024-bit filter over node positions. One hash (position mod a
/// prime), so a miss is definite and a hit only means "look it up".
#[derive(Clone)]
pub(crate) struct BloomFilter {
    bits: [u8; FILTER_BYTES],
}

const FILTER_BYTES: usize = 128;
const FILTER_MODULO: usize = 1021;

impl BloomFilter {
    pub(crate) fn new() -> Self {
        Self {
            bits: [0; FILTER_BYTES],
        }
    }

    pub(crate) fn set_in_filter(&mut self, key: usize) {
        let bit = key % FILTER_MODULO;
        self.bits[bit / 8] |= 1 << (bit % 8);
    }

    pub(crate) fn is_in_filter(&self, key: usize) -> bool {
        let bit = key % FILTER_MODULO;
        self.bits[bit / 8] & (1 << (bit % 8)) != 0
    }
}
