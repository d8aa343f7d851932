//! Duplicate-file detection and match-consolidation engine.
//!
//! Feed one or two collections of file entries into a [`DupeEngine`],
//! pick the match criteria, and step (or run) a pass: the engine fetches
//! missing attributes through an [`AttributeProvider`], links matching
//! entries into a match graph and consolidates it into ranked,
//! star-shaped duplicate groups. The crate does no I/O of its own;
//! checksums, image dimensions and similarity descriptors all come from
//! the embedding application.

pub mod core;
pub mod services;

pub use self::core::criteria::{MatchConfig, MatchCriteria};
pub use self::core::item::{FileMeta, FileRef, Item, ItemId, ItemStore};
pub use self::core::similarity::SimilarityData;
pub use services::engine::{
    DupeEngine, DuplicateGroup, EngineError, GroupMember, MatchPhase, MatchProgress, StepOutcome,
};
pub use services::pool::{PoolError, SearchMatch, SimilarityPool};
pub use services::provider::{AttributeProvider, NullProvider, StaticProvider};
