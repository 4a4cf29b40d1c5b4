/// Database layer
///
/// PostgreSQL connection pooling and embedded migrations. Queries live in
/// [`crate::store::postgres`].
///
/// # Example
///
/// ```no_run
/// use advocate_shared::db::{migrations::run_migrations, pool::{create_pool, DatabaseConfig}};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool(DatabaseConfig::from_env()?).await?;
///     run_migrations(&pool).await?;
///     Ok(())
/// }
/// ```

pub mod migrations;
pub mod pool;
