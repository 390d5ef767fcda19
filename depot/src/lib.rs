//! The Depot Library.
//!
//! Components shared between the artifact server and its tooling:
//! digests, multi-digest hashing, checkpointable hashing for resumable
//! uploads, name validation, and media types.

#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

pub mod digest;
pub mod error;
pub mod hash;
pub mod mime;
pub mod name;
pub mod util;

pub use error::{DepotError, DepotResult};
