#![no_std]
extern crate alloc;

pub mod decode;
pub mod encode;

/// No minimal encoding of a `u64` is longer than this.
pub const MAX_ENCODING_LEN: usize = 10;
