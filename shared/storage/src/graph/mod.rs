//! Material/chemical entity graph.
//!
//! Every read and write goes through a [`GraphTx`]. Nothing a transaction
//! writes is visible to others until `commit`; dropping or rolling back a
//! transaction discards all of it.

mod memory;
mod postgres;

pub use memory::{GraphSnapshot, MemoryGraphStore};
pub use postgres::PgGraphStore;

use async_trait::async_trait;
use uuid::Uuid;

use sheetscan_models::{GlobalNode, HierarchyEdge, Manufacturer, StatusAssessment};
use sheetscan_utils::SheetscanResult;

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn begin(&self) -> SheetscanResult<Box<dyn GraphTx>>;
}

#[async_trait]
pub trait GraphTx: Send {
    /// Finds a manufacturer by case-insensitive name or creates it.
    async fn upsert_manufacturer(
        &mut self,
        name: &str,
        address: Option<&str>,
        country: Option<&str>,
    ) -> SheetscanResult<Manufacturer>;

    async fn get_node(&mut self, id: Uuid) -> SheetscanResult<Option<GlobalNode>>;

    /// Looks up by CAS number first, then by case-insensitive name.
    async fn find_chemical(
        &mut self,
        manufacturer_id: Uuid,
        cas_number: Option<&str>,
        name: &str,
    ) -> SheetscanResult<Option<GlobalNode>>;

    async fn find_material(
        &mut self,
        manufacturer_id: Uuid,
        name: &str,
    ) -> SheetscanResult<Option<GlobalNode>>;

    async fn insert_node(&mut self, node: &GlobalNode) -> SheetscanResult<()>;

    async fn update_status(&mut self, id: Uuid, assessment: StatusAssessment) -> SheetscanResult<()>;

    /// Inserts the edge or replaces its weight.
    async fn upsert_edge(&mut self, edge: &HierarchyEdge) -> SheetscanResult<()>;

    async fn children_of(&mut self, parent_id: Uuid) -> SheetscanResult<Vec<GlobalNode>>;

    async fn parents_of(&mut self, child_id: Uuid) -> SheetscanResult<Vec<GlobalNode>>;

    async fn commit(self: Box<Self>) -> SheetscanResult<()>;

    async fn rollback(self: Box<Self>) -> SheetscanResult<()>;
}
