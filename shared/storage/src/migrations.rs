use anyhow::Result;
use sqlx::PgPool;

pub async fn run_postgres_migrations(pool: &PgPool) -> Result<()> {
    tracing::info!("Running PostgreSQL migrations");

    // Create manufacturer table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manufacturer (
            id UUID PRIMARY KEY,
            name VARCHAR NOT NULL,
            address TEXT,
            country VARCHAR,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_manufacturer_name ON manufacturer (lower(name))",
    )
    .execute(pool)
    .await?;

    // Create global_node table (materials and chemicals)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS global_node (
            id UUID PRIMARY KEY,
            name VARCHAR NOT NULL,
            manufacturer_id UUID NOT NULL REFERENCES manufacturer(id),
            kind VARCHAR NOT NULL CHECK (kind IN ('MATERIAL', 'CHEMICAL')),
            cas_number VARCHAR,
            status VARCHAR NOT NULL CHECK (status IN ('YES', 'NO', 'PENDING')),
            status_source VARCHAR NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create global_node_hierarchy table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS global_node_hierarchy (
            parent_id UUID NOT NULL REFERENCES global_node(id),
            child_id UUID NOT NULL REFERENCES global_node(id),
            weight_percent DOUBLE PRECISION,
            PRIMARY KEY (parent_id, child_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_global_node_cas ON global_node (manufacturer_id, cas_number)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_global_node_name ON global_node (manufacturer_id, kind, lower(name))",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_hierarchy_child ON global_node_hierarchy (child_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("PostgreSQL migrations completed successfully");
    Ok(())
}
