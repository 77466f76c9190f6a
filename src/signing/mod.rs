//! Hash-chain signer.
//!
//! Each document's signature payload embeds the hash of its predecessor in
//! the series, so deleting or reordering documents breaks the chain:
//!
//! - current hash: SHA-1 of `date;time;number;total;previous_hash`, uppercase hex
//! - signature: RSA PKCS#1 v1.5 over SHA-256 of the same bytes, base64
//! - fragment: characters 0, 10, 20 and 30 of the base64 SHA-1 digest
//!
//! The first document of a series chains to the seed `"0"`.

mod certificate;
mod chain;
mod ledger;
mod signer;

pub use certificate::*;
pub use chain::*;
pub use ledger::*;
pub use signer::*;
