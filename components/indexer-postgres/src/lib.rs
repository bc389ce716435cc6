pub mod types;
pub mod utils;

use config::PgDatabaseConfig;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Transaction};
use tokio_postgres::{Client, Config, NoTls, Row};

/// Standard chunk size used when batching multiple row inserts into a single SQL statement. Keeps us comfortably below the
/// postgres limit of 65536 bound parameters per statement for the column counts we deal with.
pub const BATCH_QUERY_CHUNK_SIZE: usize = 500;

fn build_pg_config(config: &PgDatabaseConfig) -> Config {
    let mut pg_config = Config::new();
    pg_config
        .dbname(&config.dbname)
        .host(&config.host)
        .port(config.port)
        .user(&config.user)
        .options(format!(
            "-csearch_path={}",
            config.search_path.as_ref().unwrap_or(&"public".to_string())
        ));
    if let Some(password) = &config.password {
        pg_config.password(password);
    }
    pg_config
}

/// Creates a Postgres connection pool for a single database config. Clients and transactions are then taken from the pool
/// on demand.
pub fn pg_pool(config: &PgDatabaseConfig) -> Result<Pool, String> {
    let manager = Manager::from_config(
        build_pg_config(config),
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let mut pool_builder = Pool::builder(manager);
    if let Some(size) = config.pool_max_size {
        pool_builder = pool_builder.max_size(size);
    }
    pool_builder
        .build()
        .map_err(|e| format!("unable to build pg connection pool: {e}"))
}

/// Returns a new pg connection client taken from a pool.
pub async fn pg_pool_client(pool: &Pool) -> Result<Object, String> {
    pool.get()
        .await
        .map_err(|e| format!("unable to get pg client: {e}"))
}

/// Returns a new pg transaction taken from an existing pool connection.
pub async fn pg_begin(client: &mut Object) -> Result<Transaction<'_>, String> {
    client
        .transaction()
        .await
        .map_err(|e| format!("unable to begin pg transaction: {e}"))
}

/// Connects to postgres directly (without a pool) and returns an open client.
pub async fn pg_connect(config: &PgDatabaseConfig) -> Result<Client, String> {
    match build_pg_config(config).connect(NoTls).await {
        Ok((client, connection)) => {
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    println!("postgres connection error: {e}");
                }
            });
            Ok(client)
        }
        Err(e) => Err(format!("error connecting to postgres: {e}")),
    }
}

/// Connects to postgres with infinite retries and returns an open client.
pub async fn pg_connect_with_retry(config: &PgDatabaseConfig) -> Client {
    loop {
        match pg_connect(config).await {
            Ok(client) => return client,
            Err(e) => {
                println!("error connecting to postgres: {e}");
                std::thread::sleep(std::time::Duration::from_secs(1));
            }
        }
    }
}

/// Transforms a Postgres row into a model struct.
pub trait FromPgRow {
    fn from_pg_row(row: &Row) -> Self;
}
