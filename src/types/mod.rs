// Core types of the interoperability engine
// Principle: minimal, auditable, fail closed

pub mod certificate;
pub mod chain;
pub mod merkle;
pub mod message;
pub mod primitives;
pub mod smt;

pub use certificate::*;
pub use chain::*;
pub use merkle::*;
pub use message::*;
pub use primitives::*;
pub use smt::*;
