// Cryptography - BLS aggregate verification for cross-chain certificates

pub mod bls;

pub use bls::*;
