//! OAuth2 authorization code gate
//!
//! Handles:
//! - Session credential encoding
//! - Provider redirect and code exchange
//! - Request classification
//! - Authentication middleware

mod classifier;
mod middleware;
pub mod provider;
pub mod session;

pub use classifier::{Classification, classify, extract_session};
pub use middleware::{AUTHORIZATION_STATE, AuthState, CurrentSession, MaybeSession, require_oauth};
pub use provider::{OAuth2Client, ProviderClient};
pub use session::{SessionToken, decode_session, encode_session};
