use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use sheetscan_models::{GlobalNode, HierarchyEdge, Manufacturer, StatusAssessment};
use sheetscan_utils::{SheetscanError, SheetscanResult};

use super::{GraphStore, GraphTx};

const NODE_COLUMNS: &str = "n.id, n.name, n.manufacturer_id, n.kind, n.cas_number, n.status, \
                            n.status_source, n.created_at, n.updated_at";

/// Graph persisted in the `manufacturer`, `global_node` and
/// `global_node_hierarchy` tables. Rows read inside a transaction are locked
/// with `FOR UPDATE` until it ends.
#[derive(Clone)]
pub struct PgGraphStore {
    pool: PgPool,
}

impl PgGraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn begin(&self) -> SheetscanResult<Box<dyn GraphTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgGraphTx { tx }))
    }
}

struct PgGraphTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl GraphTx for PgGraphTx {
    async fn upsert_manufacturer(
        &mut self,
        name: &str,
        address: Option<&str>,
        country: Option<&str>,
    ) -> SheetscanResult<Manufacturer> {
        let existing: Option<ManufacturerRow> = sqlx::query_as(
            r#"
            SELECT id, name, address, country, created_at
            FROM manufacturer
            WHERE lower(name) = lower($1)
            FOR UPDATE
            "#,
        )
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(row) = existing {
            return Ok(row.into());
        }

        let row: ManufacturerRow = sqlx::query_as(
            r#"
            INSERT INTO manufacturer (id, name, address, country, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, address, country, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(address)
        .bind(country)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.into())
    }

    async fn get_node(&mut self, id: Uuid) -> SheetscanResult<Option<GlobalNode>> {
        let row: Option<NodeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM global_node n WHERE n.id = $1 FOR UPDATE",
            NODE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(GlobalNode::try_from).transpose()
    }

    async fn find_chemical(
        &mut self,
        manufacturer_id: Uuid,
        cas_number: Option<&str>,
        name: &str,
    ) -> SheetscanResult<Option<GlobalNode>> {
        if let Some(cas) = cas_number {
            let row: Option<NodeRow> = sqlx::query_as(&format!(
                r#"
                SELECT {} FROM global_node n
                WHERE n.kind = 'CHEMICAL' AND n.manufacturer_id = $1 AND n.cas_number = $2
                ORDER BY n.created_at
                LIMIT 1
                FOR UPDATE
                "#,
                NODE_COLUMNS
            ))
            .bind(manufacturer_id)
            .bind(cas)
            .fetch_optional(&mut *self.tx)
            .await?;

            if let Some(row) = row {
                return Ok(Some(row.try_into()?));
            }
        }

        let row: Option<NodeRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM global_node n
            WHERE n.kind = 'CHEMICAL' AND n.manufacturer_id = $1 AND lower(n.name) = lower($2)
            ORDER BY n.created_at
            LIMIT 1
            FOR UPDATE
            "#,
            NODE_COLUMNS
        ))
        .bind(manufacturer_id)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(GlobalNode::try_from).transpose()
    }

    async fn find_material(
        &mut self,
        manufacturer_id: Uuid,
        name: &str,
    ) -> SheetscanResult<Option<GlobalNode>> {
        let row: Option<NodeRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM global_node n
            WHERE n.kind = 'MATERIAL' AND n.manufacturer_id = $1 AND lower(n.name) = lower($2)
            ORDER BY n.created_at
            LIMIT 1
            FOR UPDATE
            "#,
            NODE_COLUMNS
        ))
        .bind(manufacturer_id)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(GlobalNode::try_from).transpose()
    }

    async fn insert_node(&mut self, node: &GlobalNode) -> SheetscanResult<()> {
        sqlx::query(
            r#"
            INSERT INTO global_node
                (id, name, manufacturer_id, kind, cas_number, status, status_source, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(node.id)
        .bind(&node.name)
        .bind(node.manufacturer_id)
        .bind(node.kind.as_str())
        .bind(&node.cas_number)
        .bind(node.status.as_str())
        .bind(node.status_source.as_str())
        .bind(node.created_at)
        .bind(node.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_status(&mut self, id: Uuid, assessment: StatusAssessment) -> SheetscanResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE global_node
            SET status = $2, status_source = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(assessment.status.as_str())
        .bind(assessment.source.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SheetscanError::not_found(format!("node {}", id)));
        }
        Ok(())
    }

    async fn upsert_edge(&mut self, edge: &HierarchyEdge) -> SheetscanResult<()> {
        sqlx::query(
            r#"
            INSERT INTO global_node_hierarchy (parent_id, child_id, weight_percent)
            VALUES ($1, $2, $3)
            ON CONFLICT (parent_id, child_id) DO UPDATE SET
                weight_percent = EXCLUDED.weight_percent
            "#,
        )
        .bind(edge.parent_id)
        .bind(edge.child_id)
        .bind(edge.weight_percent)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn children_of(&mut self, parent_id: Uuid) -> SheetscanResult<Vec<GlobalNode>> {
        let rows: Vec<NodeRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM global_node n
            JOIN global_node_hierarchy h ON h.child_id = n.id
            WHERE h.parent_id = $1
            ORDER BY n.id
            FOR UPDATE OF n
            "#,
            NODE_COLUMNS
        ))
        .bind(parent_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(GlobalNode::try_from).collect()
    }

    async fn parents_of(&mut self, child_id: Uuid) -> SheetscanResult<Vec<GlobalNode>> {
        let rows: Vec<NodeRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM global_node n
            JOIN global_node_hierarchy h ON h.parent_id = n.id
            WHERE h.child_id = $1
            ORDER BY n.id
            FOR UPDATE OF n
            "#,
            NODE_COLUMNS
        ))
        .bind(child_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(GlobalNode::try_from).collect()
    }

    async fn commit(self: Box<Self>) -> SheetscanResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> SheetscanResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct ManufacturerRow {
    id: Uuid,
    name: String,
    address: Option<String>,
    country: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ManufacturerRow> for Manufacturer {
    fn from(row: ManufacturerRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            address: row.address,
            country: row.country,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct NodeRow {
    id: Uuid,
    name: String,
    manufacturer_id: Uuid,
    kind: String,
    cas_number: Option<String>,
    status: String,
    status_source: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NodeRow> for GlobalNode {
    type Error = SheetscanError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        let corrupt = |message: String| SheetscanError::storage(format!("node {}: {}", row.id, message));

        Ok(Self {
            kind: row.kind.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            status_source: row.status_source.parse().map_err(corrupt)?,
            id: row.id,
            name: row.name,
            manufacturer_id: row.manufacturer_id,
            cas_number: row.cas_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
