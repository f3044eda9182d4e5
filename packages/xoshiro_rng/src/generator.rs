use rand::{RngCore, SeedableRng};
use tracing::trace;

use crate::SplitMix64;

/// Bits that place a 32-bit pattern in the `[1, 2)` exponent of an `f32`.
const EXPONENT_ONE: u32 = 0x3f80_0000;

/// Clears the sign bit and the top exponent bit, leaving a positive value in `[1, 2)`.
const POSITIVE_MASK: u32 = 0x3fff_ffff;

/// Clears only the top exponent bit, keeping the random sign of the sample.
const SIGNED_MASK: u32 = 0xbfff_ffff;

/// Bits consumed from the cached sample by each float draw.
const FLOAT_SLICE_BITS: u32 = 23;

/// A xoshiro256** pseudo-random generator with explicit, caller-owned state.
///
/// The generator is seeded from a single 64-bit value expanded by splitmix64, which
/// decorrelates even adjacent seeds. Identical seeds always produce identical sequences,
/// which makes the generator suitable for reproducible shuffles and simulations.
///
/// Narrow draws ([`next_u32()`](Self::next_u32), [`next_u16()`](Self::next_u16) and the
/// float draws) each cache one 64-bit sample and slice it into several results, so two
/// 32-bit draws or four 16-bit draws cost a single state step.
///
/// This is not a cryptographically secure generator.
///
/// # Examples
///
/// ```
/// use xoshiro_rng::XoshiroRng;
///
/// let mut a = XoshiroRng::new(42);
/// let mut b = XoshiroRng::new(42);
///
/// assert_eq!(a.next_u64(), b.next_u64());
///
/// let unit = a.next_f32();
/// assert!((0.0..1.0).contains(&unit));
/// ```
///
/// # Thread safety
///
/// The generator is a plain value. It can be moved between threads and, because all draws
/// take `&mut self`, sharing one instance requires external synchronization.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct XoshiroRng {
    state: [u64; 4],

    u32_cache: SampleCache,
    u16_cache: SampleCache,
    f32_cache: SampleCache,
}

impl XoshiroRng {
    /// Creates a generator from a 64-bit seed.
    ///
    /// The four state words are successive splitmix64 outputs of the seed. One generation
    /// step is discarded before the generator is returned.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let mut splitmix = SplitMix64::new(seed);

        let state = [
            splitmix.next_u64(),
            splitmix.next_u64(),
            splitmix.next_u64(),
            splitmix.next_u64(),
        ];

        let mut rng = Self::from_state(state);

        // The first output is discarded to move away from the raw splitmix output.
        _ = rng.next_u64();

        trace!(seed, "seeded xoshiro256** generator");

        rng
    }

    #[must_use]
    fn from_state(state: [u64; 4]) -> Self {
        Self {
            state,
            u32_cache: SampleCache::default(),
            u16_cache: SampleCache::default(),
            f32_cache: SampleCache::default(),
        }
    }

    /// Advances the state and returns the next 64-bit value.
    ///
    /// This is the only operation that advances the generator state. All narrower draws
    /// are sliced from values returned by this method.
    pub fn next_u64(&mut self) -> u64 {
        let [s0, s1, s2, s3] = &mut self.state;

        let result = s1.wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = *s1 << 17;

        *s2 ^= *s0;
        *s3 ^= *s1;
        *s1 ^= *s2;
        *s0 ^= *s3;

        *s2 ^= t;
        *s3 = s3.rotate_left(45);

        result
    }

    /// Returns the next 32-bit value.
    ///
    /// Each 64-bit sample services two calls, low half first.
    pub fn next_u32(&mut self) -> u32 {
        if self.u32_cache.is_exhausted() {
            let sample = self.next_u64();
            self.u32_cache.refill(sample, 2);
        }

        #[expect(
            clippy::cast_possible_truncation,
            reason = "we intentionally keep only the low 32 bits of the slice"
        )]
        let value = self.u32_cache.take(32) as u32;

        value
    }

    /// Returns the next 16-bit value.
    ///
    /// Each 64-bit sample services four calls, lowest quarter first.
    pub fn next_u16(&mut self) -> u16 {
        if self.u16_cache.is_exhausted() {
            let sample = self.next_u64();
            self.u16_cache.refill(sample, 4);
        }

        #[expect(
            clippy::cast_possible_truncation,
            reason = "we intentionally keep only the low 16 bits of the slice"
        )]
        let value = self.u16_cache.take(16) as u16;

        value
    }

    /// Returns a float in the range `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        self.next_float(POSITIVE_MASK)
    }

    /// Returns a float in the range `(-1, 1)`, with a random sign.
    pub fn next_signed_f32(&mut self) -> f32 {
        self.next_float(SIGNED_MASK)
    }

    /// Returns a float scaled from [`next_f32()`](Self::next_f32) into `[min, max]`.
    ///
    /// The unscaled value never reaches 1, but `f32` rounding of the scaled result can land
    /// exactly on `max`. If `max < min` the bounds swap roles.
    pub fn next_f32_range(&mut self, min: f32, max: f32) -> f32 {
        self.next_f32() * (max - min) + min
    }

    fn next_float(&mut self, mask: u32) -> f32 {
        if self.f32_cache.is_exhausted() {
            let sample = self.next_u64();
            self.f32_cache.refill(sample, 2);
        }

        #[expect(
            clippy::cast_possible_truncation,
            reason = "the mantissa comes from the low 32 bits of the slice"
        )]
        let bits = self.f32_cache.take(FLOAT_SLICE_BITS) as u32;

        // The exponent is forced to 127, so the value lies in [1, 2) or (-2, -1].
        let value = f32::from_bits((bits | EXPONENT_ONE) & mask);

        if value.is_sign_negative() {
            value + 1.0
        } else {
            value - 1.0
        }
    }
}

impl Default for XoshiroRng {
    /// Equivalent to `XoshiroRng::new(0)`.
    fn default() -> Self {
        Self::new(0)
    }
}

impl RngCore for XoshiroRng {
    fn next_u32(&mut self) -> u32 {
        Self::next_u32(self)
    }

    fn next_u64(&mut self) -> u64 {
        Self::next_u64(self)
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for chunk in dst.chunks_mut(8) {
            let bytes = Self::next_u64(self).to_le_bytes();

            for (dst_byte, src_byte) in chunk.iter_mut().zip(bytes) {
                *dst_byte = src_byte;
            }
        }
    }
}

impl SeedableRng for XoshiroRng {
    type Seed = [u8; 32];

    /// Uses the 32 seed bytes directly as the four little-endian state words.
    ///
    /// xoshiro256** cannot leave the all-zero state, so an all-zero seed is replaced by
    /// the state of `seed_from_u64(0)`.
    fn from_seed(seed: Self::Seed) -> Self {
        let mut state = [0_u64; 4];

        for (word, chunk) in state.iter_mut().zip(seed.chunks_exact(8)) {
            let mut bytes = [0_u8; 8];
            bytes.copy_from_slice(chunk);
            *word = u64::from_le_bytes(bytes);
        }

        if state == [0; 4] {
            return Self::seed_from_u64(0);
        }

        Self::from_state(state)
    }

    fn seed_from_u64(state: u64) -> Self {
        Self::new(state)
    }
}

/// One cached 64-bit sample that is handed out in slices.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct SampleCache {
    sample: u64,
    remaining: u8,
}

impl SampleCache {
    #[must_use]
    fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    fn refill(&mut self, sample: u64, slices: u8) {
        self.sample = sample;
        self.remaining = slices;
    }

    /// Returns the current sample and shifts `shift` bits out of it.
    fn take(&mut self, shift: u32) -> u64 {
        debug_assert!(!self.is_exhausted(), "sample cache must be refilled first");

        let value = self.sample;
        self.sample >>= shift;
        self.remaining = self.remaining.saturating_sub(1);
        value
    }
}
