// Lattice Core - cross-chain update processing and message recovery engine
// Principle: fail closed, contain misbehavior per chain, keep every outcome auditable

pub mod codec;
pub mod crypto;
pub mod interop;
pub mod registry;
pub mod storage;
pub mod types;

#[cfg(test)]
mod tests;
