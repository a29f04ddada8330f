//! Consensus parameters and the checks the wallet runs on peer-supplied chain data.
//!
//! The wallet never replays consensus. It checks the pieces a light client can afford (chain
//! linkage, Merkle commitments, iteration bounds) and delegates the cryptography it cannot carry
//! itself to a [`ChainValidationOracle`].

mod constants;
pub use constants::{ConsensusConstants, SINGLETON_LAUNCHER_HASH};

mod oracle;
pub use oracle::ChainValidationOracle;

mod span;
pub use span::SpanValidator;

mod weight_proof;
pub use weight_proof::{WeightProofError, WeightProofVerifier};
