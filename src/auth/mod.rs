//! API key authentication and tenant resolution

mod key;
mod store;
mod verifier;

pub use key::{hash_api_key, ApiKey, KeyUsage, RateLimit, Refill};
pub use store::{CredentialStore, CredentialStoreError, InMemoryCredentialStore, KeySeed};
pub use verifier::{evaluate, AuthError, KeyVerifier, Verification, VerifierConfig, MAX_CREDENTIAL_LEN};
