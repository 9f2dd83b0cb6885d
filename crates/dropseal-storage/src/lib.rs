//! dropseal-storage: OpenDAL-backed store for ciphertext blobs and bundle records
//!
//! The store only ever sees ciphertext and the public fields of a
//! [`BundleRecord`](dropseal_core::types::BundleRecord).

pub mod health;
pub mod operator;
pub mod store;

pub use health::check_health;
pub use operator::{build_operator, S3Credentials};
pub use store::BundleStore;
