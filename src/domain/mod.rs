//! Domain Layer
//!
//! Trait abstractions for the external collaborators of the core, plus the
//! small value objects that cross them.
//!
//! # Usage
//!
//! ```ignore
//! use quotegate::domain::{QuoteProvider, SharedStore};
//!
//! async fn warm<P: QuoteProvider, S: SharedStore>(provider: &P, store: &S, mint: &str) -> Result<()> {
//!     let payload = provider.fetch(mint).await?;
//!     store.set(&format!("dex:{mint}"), payload, Duration::from_secs(60)).await
//! }
//! ```

pub mod ports;

pub use ports::{LockToken, QuoteProvider, ResourceKey, SharedStore};
