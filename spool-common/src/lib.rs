//! spool-common
//!
//! Types shared by the accumulator, the commitment ledger and the sync
//! service: the 32-byte [`Digest`] word, the pluggable [`HashDomain`]
//! combiner and nullifier derivation.

pub mod digest;
pub mod error;
pub mod hash;

pub use digest::{Digest, DIGEST_BYTES};
pub use error::{CommonError, Result};
pub use hash::{derive_nullifier, HashAlgorithm, HashDomain};
