/// The splitmix64 golden-ratio increment applied to the state before each output.
const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

/// Minimal splitmix64 generator, used only to expand a single 64-bit seed into the
/// four words of xoshiro256** state.
///
/// Each output is an avalanche of the incremented state, so adjacent seeds such as
/// 0 and 1 still produce unrelated initial states.
#[derive(Clone, Debug)]
pub(crate) struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    #[must_use]
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        mix(self.state)
    }
}

/// The splitmix64 finalizer: multiply-xor-shift rounds over a single word.
#[must_use]
fn mix(x: u64) -> u64 {
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
