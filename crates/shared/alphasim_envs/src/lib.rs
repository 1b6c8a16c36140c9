//! Concrete environments for the `alphasim` run controller.
//!
//! Each one owns its counters, its presentation order and its own [`Prng`],
//! so a fixed seed reproduces the same item sequence.
//!
//! [`Prng`]: alphasim::prng::Prng

pub mod bandit;
pub mod sentence;
pub mod stats;
pub mod table;

pub use bandit::{BanditConfig, BanditEnv};
pub use sentence::{Sentence, SentenceCorpus, SentenceEnv, Token};
pub use table::{PatternRow, PatternTable, TableEnv};
