//! Caller authentication: signing keys, token verification and the bearer
//! middleware.

pub mod keys;
pub mod middleware;
pub mod token;

pub use keys::{
    HttpKeySource, KeyCachePolicy, KeyEndpoint, KeyFetchError, KeySource, SigningKeyCache,
    SigningKeySet, VerificationKey,
};
pub use middleware::{auth_middleware, bearer_token};
pub use token::{AuthError, Principal, TokenAuthenticator};
