//! URL/Query Frontier
//! Cooldowns, dead-pattern learning, and per-domain bookkeeping that keep
//! the crawler from wasting fetches.

pub mod canonical;
pub mod cooldown;
pub mod store;

pub use canonical::{canonicalize, path_signature, root_domain, CanonicalUrl};
pub use cooldown::{cooldown_for, Cooldown};
pub use store::{
    query_hash, value_hash, FetchRecord, FrontierSnapshot, FrontierStore, QueryRecord,
    QueryResult, SkipVerdict, UrlRecord,
};
