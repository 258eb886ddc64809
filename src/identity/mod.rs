//! Identity Gate
//! Per-page identity scoring against the lock, then cross-page
//! reconciliation into one product-level verdict.

pub mod gate;
pub mod reconcile;
pub mod tokens;

pub use gate::{evaluate_page, PageDecision, PageIdentity, PageSignals};
pub use reconcile::{reconcile, IdentityReport, IdentityStatus, PageEvidence};
pub use tokens::{connection_class, token_set, tokenize, ConnectionClass};
