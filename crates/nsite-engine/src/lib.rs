//! Request pipeline tying the nsite gateway together.
//!
//! The [`Gateway`] owns the resolvers and the blob fetcher and turns a
//! `(hostname, path)` pair into [`SiteContent`]: a verified body stream plus
//! the response metadata. The [`InvalidationListener`] keeps the metadata
//! caches honest by evicting entries as new site records are published.
//!
//! Front ends (the HTTP server, the `resolve` diagnostic command) depend only
//! on [`Gateway::resolve_content`] and [`GatewayError`].

pub mod error;
pub mod gateway;
pub mod invalidation;

pub use error::GatewayError;
pub use gateway::{Gateway, GatewayConfig, GatewayParts, SiteContent};
pub use invalidation::InvalidationListener;

#[cfg(test)]
mod tests;
