#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A small, fast xoshiro256** pseudo-random generator with explicit state.
//!
//! This crate provides [`XoshiroRng`], a generator that is seeded from a single `u64`
//! via splitmix64 and produces reproducible sequences of 64, 32 and 16-bit integers
//! and normalized `f32` values.
//!
//! # Key Features
//!
//! - **Deterministic**: the same seed always yields the same sequence
//! - **Explicit state**: no process-wide globals, each caller owns or injects a generator
//! - **Cheap narrow draws**: 32-bit, 16-bit and float draws are sliced from cached 64-bit
//!   samples, so several narrow values cost one state step
//! - **Ecosystem integration**: implements [`rand::RngCore`] and [`rand::SeedableRng`],
//!   so every [`rand::Rng`] helper and any API generic over `RngCore` accepts it
//!
//! # Examples
//!
//! ```
//! use xoshiro_rng::XoshiroRng;
//!
//! let mut rng = XoshiroRng::new(2024);
//!
//! let wide = rng.next_u64();
//! let half = rng.next_u32();
//! let quarter = rng.next_u16();
//!
//! let unit = rng.next_f32();
//! assert!((0.0..1.0).contains(&unit));
//!
//! let signed = rng.next_signed_f32();
//! assert!(signed > -1.0 && signed < 1.0);
//!
//! let scaled = rng.next_f32_range(10.0, 20.0);
//! assert!((10.0..=20.0).contains(&scaled));
//! # _ = (wide, half, quarter);
//! ```
//!
//! Using the generator through the `rand` traits:
//!
//! ```
//! use rand::{Rng, SeedableRng};
//! use xoshiro_rng::XoshiroRng;
//!
//! let mut rng = XoshiroRng::seed_from_u64(7);
//!
//! let die = rng.random_range(1..=6);
//! assert!((1..=6).contains(&die));
//! ```

mod generator;
mod splitmix;

pub use generator::XoshiroRng;
pub(crate) use splitmix::*;
