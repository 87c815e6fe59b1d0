//! URL helpers
//!
//! Budgets, flow states and site profiles are all keyed by the lowercase host
//! of the URL being fetched.

mod domain;

pub use domain::extract_domain;
