//! Dialogue Engine — search-based dialogue planning for games.
//!
//! Plans multi-character conversations by searching over possible
//! continuations with Monte Carlo Tree Search, using an external
//! text-generation service (the oracle) both to propose candidate
//! utterances and to judge their quality, while tracking persistent
//! character attitudes and relations across an append-only turn history.

pub mod core;
pub mod schema;
