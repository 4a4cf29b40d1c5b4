/// Authentication
///
/// Bearer tokens are verified by an external identity provider and mapped to
/// a stable user identifier. The rest of the system only sees an
/// [`middleware::AuthContext`].
///
/// # Modules
///
/// - [`identity`]: the `IdentityProvider` trait and its error codes
/// - [`firebase`]: Firebase Authentication ID tokens (RS256, Google JWKS)
/// - [`local`]: HS256 tokens with a shared secret, for development and tests
/// - [`middleware`]: `authenticate` and the `AuthContext` extractor
///
/// # Example
///
/// ```no_run
/// use advocate_shared::auth::{authenticate, build_identity_provider};
/// use advocate_shared::config::IdentityConfig;
/// use advocate_shared::store::MemoryStore;
///
/// # async fn example(token: &str) -> anyhow::Result<()> {
/// let identity = build_identity_provider(&IdentityConfig::from_env()?)?;
/// let store = MemoryStore::new();
///
/// let ctx = authenticate(identity.as_ref(), &store, token, chrono::Utc::now()).await?;
/// println!("Authenticated {}", ctx.user_id);
/// # Ok(())
/// # }
/// ```

pub mod firebase;
pub mod identity;
pub mod local;
pub mod middleware;

pub use identity::{build_identity_provider, IdentityError, IdentityProvider, VerifiedIdentity};
pub use middleware::{authenticate, bearer_token, AuthContext, AuthError};
