//! Storefront Auth - session lifecycle and credential management
//!
//! This library provides the authentication security core for the
//! storefront platform: rotating session tokens, session revocation,
//! password entropy validation and bcrypt credential storage.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod passwords;
pub mod session;
pub mod store;
pub mod token;
pub mod types;
