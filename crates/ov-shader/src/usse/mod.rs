//! USSE instruction set
//!
//! The decoder classifies 64-bit instruction words into [`Instruction`]s and
//! [`RepeatSession`] tracks the register stepping of repeated instructions.

pub mod decode;
pub mod helpers;
pub mod matcher;
pub mod repeat;
pub mod types;

pub use decode::{decode, decode_with, predicate_write, DecodeContext};
pub use repeat::{family_multiplier, RepeatSession};
pub use types::*;
