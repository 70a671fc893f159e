//! Noise injection for exercising retry behaviour
//!
//! [`NoisyTransport`] corrupts the bytes read from an inner transport: it can
//! flip single bits and drop whole bytes. Randomness comes from a seeded
//! [`StdRng`] handed in by the caller, so runs are reproducible.

use crate::transport::Transport;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rtubus_core::RtuResult;

/// Per-byte fault probabilities
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NoiseProfile {
    /// Probability that one bit of a received byte is inverted
    pub bit_flip: f64,
    /// Probability that a received byte is lost
    pub drop: f64,
}

impl NoiseProfile {
    /// No faults
    pub const CLEAN: Self = Self {
        bit_flip: 0.0,
        drop: 0.0,
    };

    /// Every byte lost
    pub const DEAD: Self = Self {
        bit_flip: 0.0,
        drop: 1.0,
    };
}

/// Transport wrapper that corrupts received bytes
#[derive(Debug)]
pub struct NoisyTransport<T> {
    inner: T,
    rng: StdRng,
    profile: NoiseProfile,
    flipped: u64,
    dropped: u64,
}

impl<T: Transport> NoisyTransport<T> {
    /// Wrap `inner` using the given random generator
    pub fn new(inner: T, rng: StdRng, profile: NoiseProfile) -> Self {
        Self {
            inner,
            rng,
            profile,
            flipped: 0,
            dropped: 0,
        }
    }

    /// Wrap `inner` with a generator seeded from `seed`
    pub fn with_seed(inner: T, seed: u64, profile: NoiseProfile) -> Self {
        Self::new(inner, StdRng::seed_from_u64(seed), profile)
    }

    /// Change the fault probabilities
    pub fn set_profile(&mut self, profile: NoiseProfile) {
        self.profile = profile;
    }

    /// Number of bytes that had a bit inverted
    pub fn flipped(&self) -> u64 {
        self.flipped
    }

    /// Number of bytes that were lost
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Transport> Transport for NoisyTransport<T> {
    fn begin(&mut self, baud_rate: u32) -> RtuResult<()> {
        self.inner.begin(baud_rate)
    }

    fn end(&mut self) {
        self.inner.end()
    }

    fn listen(&mut self) {
        self.inner.listen()
    }

    fn stop_listening(&mut self) {
        self.inner.stop_listening()
    }

    fn is_listening(&self) -> bool {
        self.inner.is_listening()
    }

    fn write(&mut self, byte: u8) -> RtuResult<usize> {
        self.inner.write(byte)
    }

    fn read(&mut self) -> Option<u8> {
        loop {
            let byte = self.inner.read()?;
            if self.profile.drop > 0.0 && self.rng.gen_bool(self.profile.drop.min(1.0)) {
                self.dropped += 1;
                log::trace!("noise: dropped byte 0x{:02X}", byte);
                continue;
            }
            if self.profile.bit_flip > 0.0 && self.rng.gen_bool(self.profile.bit_flip.min(1.0)) {
                let bit = self.rng.gen_range(0..8);
                self.flipped += 1;
                log::trace!("noise: flipped bit {} of 0x{:02X}", bit, byte);
                return Some(byte ^ (1 << bit));
            }
            return Some(byte);
        }
    }

    fn available(&self) -> usize {
        self.inner.available()
    }

    fn begin_transmission(&mut self) -> RtuResult<()> {
        self.inner.begin_transmission()
    }

    fn end_transmission(&mut self) -> RtuResult<()> {
        self.inner.end_transmission()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLine;

    #[test]
    fn test_clean_profile_passes_bytes() {
        let (mut a, b) = MemoryLine::pair();
        let mut noisy = NoisyTransport::with_seed(b, 1, NoiseProfile::CLEAN);
        a.write_all(&[0x11, 0x22]).unwrap();
        assert_eq!(noisy.read(), Some(0x11));
        assert_eq!(noisy.read(), Some(0x22));
        assert_eq!(noisy.read(), None);
    }

    #[test]
    fn test_dead_profile_drops_everything() {
        let (mut a, b) = MemoryLine::pair();
        let mut noisy = NoisyTransport::with_seed(b, 1, NoiseProfile::DEAD);
        a.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(noisy.read(), None);
        assert_eq!(noisy.dropped(), 3);
    }

    #[test]
    fn test_bit_flip_changes_exactly_one_bit() {
        let (mut a, b) = MemoryLine::pair();
        let profile = NoiseProfile {
            bit_flip: 1.0,
            drop: 0.0,
        };
        let mut noisy = NoisyTransport::with_seed(b, 7, profile);
        a.write(0x00).unwrap();
        let byte = noisy.read().unwrap();
        assert_eq!(byte.count_ones(), 1);
        assert_eq!(noisy.flipped(), 1);
    }
}
