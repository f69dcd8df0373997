//! Pair filtering and quote-direction rules
//!
//! Loaded from JSON config files at startup.

pub mod blacklist;
pub mod quote_rules;

pub use blacklist::{BlacklistFile, PairFilter, SkipReason};
pub use quote_rules::{ReferenceTokens, ReverseTokens, DEFAULT_REFERENCE_SYMBOLS};
