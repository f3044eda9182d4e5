#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A type-erased growable array with explicit capacity control.
//!
//! This crate provides [`OpaqueVec`], a contiguous, growable array that stores elements of any
//! type as long as they match a [`std::alloc::Layout`] defined at creation, and [`TypedVec<T>`],
//! a safe facade over it for a single `Copy` type.
//!
//! # Key Features
//!
//! - **Type-erased storage**: elements are fixed-size blocks described by a layout, accessed as
//!   bytes or, with the caller vouching for the type, as typed references
//! - **Amortized growth**: appends grow the storage by a configurable increment (default 8)
//! - **Bulk insertion with aliasing checks**: inserting a source that overlaps the destination
//!   storage is rejected rather than attempted
//! - **Explicit capacity control**: expand on demand, shrink to the exact length
//! - **Sort and shuffle**: comparator-driven unstable sort over any sub-range and a
//!   Fisher-Yates shuffle driven by any [`rand::RngCore`]
//! - **Failure atomicity**: every fallible operation returns an [`Error`] and leaves the
//!   vector in its last valid state
//! - **Explicit release**: storage can be released early, and double release is reported
//!
//! # Examples
//!
//! Working with byte-sized elements:
//!
//! ```
//! use opaque_vec::{Error, OpaqueVec};
//!
//! let mut vec = OpaqueVec::with_capacity(4, 2).unwrap();
//!
//! vec.push_bytes(&[1, 1]).unwrap();
//! vec.push_bytes(&[2, 2]).unwrap();
//!
//! assert_eq!(vec.as_bytes(), &[1, 1, 2, 2]);
//! assert_eq!(vec.push_bytes(&[3]), Err(Error::ElementSizeMismatch { expected: 2, actual: 1 }));
//!
//! vec.remove_last().unwrap();
//! vec.shrink_to_fit().unwrap();
//! assert_eq!(vec.capacity(), 1);
//! ```
//!
//! Typed use with a seeded shuffle:
//!
//! ```
//! use opaque_vec::TypedVec;
//! use xoshiro_rng::XoshiroRng;
//!
//! let mut deck = TypedVec::<u8>::new();
//!
//! for card in 0..52 {
//!     deck.push(card).unwrap();
//! }
//!
//! let mut rng = XoshiroRng::new(2024);
//! deck.shuffle(&mut rng).unwrap();
//!
//! let mut sorted = deck.as_slice().to_vec();
//! sorted.sort_unstable();
//! assert_eq!(sorted, (0..52).collect::<Vec<_>>());
//! ```

mod builder;
mod error;
mod raw_buffer;
mod typed;
mod vec;

pub use builder::*;
pub use error::*;
pub(crate) use raw_buffer::*;
pub use typed::TypedVec;
pub use vec::OpaqueVec;
pub(crate) use vec::DEFAULT_GROWTH_INCREMENT;
