use anyhow::{Context, Result};
use cortex_config::Settings;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod documents;

pub use documents::{
    check_transition, clear_file_path, create_document, document_by_id,
    document_by_id_for_update, document_by_source, retry_document, set_file_path, update_status,
    DocumentRow, RepoError,
};

/// Connect to Postgres using the configured URL and pool size.
pub async fn connect(settings: &Settings) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.db_pool_size)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Test helper used by integration tests:
/// - Connect using CORTEX_DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect(&Settings::from_env()).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Simple status query (connectivity + schema presence), used by readiness.
pub async fn db_status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='documents'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_documents_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_documents_table: bool,
}
