use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use sheetscan_models::{GlobalNode, HierarchyEdge, Manufacturer, NodeKind, StatusAssessment};
use sheetscan_utils::{SheetscanError, SheetscanResult};

use super::{GraphStore, GraphTx};

#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub manufacturers: HashMap<Uuid, Manufacturer>,
    pub nodes: HashMap<Uuid, GlobalNode>,
    pub edges: BTreeMap<(Uuid, Uuid), HierarchyEdge>,
}

impl GraphSnapshot {
    pub fn node(&self, id: Uuid) -> Option<&GlobalNode> {
        self.nodes.get(&id)
    }

    pub fn node_named(&self, kind: NodeKind, name: &str) -> Option<&GlobalNode> {
        self.nodes
            .values()
            .find(|node| node.kind == kind && node.name.eq_ignore_ascii_case(name))
    }

    fn sorted(mut nodes: Vec<GlobalNode>) -> Vec<GlobalNode> {
        nodes.sort_by_key(|node| node.id);
        nodes
    }
}

/// Graph held in memory. A transaction holds the whole graph exclusively and
/// edits a copy that replaces the original on commit.
#[derive(Default, Clone)]
pub struct MemoryGraphStore {
    state: Arc<Mutex<GraphSnapshot>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn begin(&self) -> SheetscanResult<Box<dyn GraphTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryGraphTx { guard, working }))
    }
}

struct MemoryGraphTx {
    guard: OwnedMutexGuard<GraphSnapshot>,
    working: GraphSnapshot,
}

#[async_trait]
impl GraphTx for MemoryGraphTx {
    async fn upsert_manufacturer(
        &mut self,
        name: &str,
        address: Option<&str>,
        country: Option<&str>,
    ) -> SheetscanResult<Manufacturer> {
        if let Some(existing) = self
            .working
            .manufacturers
            .values()
            .find(|m| m.name.eq_ignore_ascii_case(name))
        {
            return Ok(existing.clone());
        }

        let mut manufacturer = Manufacturer::new(name);
        manufacturer.address = address.map(str::to_string);
        manufacturer.country = country.map(str::to_string);
        self.working
            .manufacturers
            .insert(manufacturer.id, manufacturer.clone());
        Ok(manufacturer)
    }

    async fn get_node(&mut self, id: Uuid) -> SheetscanResult<Option<GlobalNode>> {
        Ok(self.working.nodes.get(&id).cloned())
    }

    async fn find_chemical(
        &mut self,
        manufacturer_id: Uuid,
        cas_number: Option<&str>,
        name: &str,
    ) -> SheetscanResult<Option<GlobalNode>> {
        let chemicals: Vec<&GlobalNode> = self
            .working
            .nodes
            .values()
            .filter(|node| node.kind == NodeKind::Chemical && node.manufacturer_id == manufacturer_id)
            .collect();

        if let Some(cas) = cas_number {
            if let Some(found) = chemicals
                .iter()
                .filter(|node| node.cas_number.as_deref() == Some(cas))
                .min_by_key(|node| node.created_at)
            {
                return Ok(Some((*found).clone()));
            }
        }

        Ok(chemicals
            .iter()
            .filter(|node| node.name.eq_ignore_ascii_case(name))
            .min_by_key(|node| node.created_at)
            .map(|node| (*node).clone()))
    }

    async fn find_material(
        &mut self,
        manufacturer_id: Uuid,
        name: &str,
    ) -> SheetscanResult<Option<GlobalNode>> {
        Ok(self
            .working
            .nodes
            .values()
            .find(|node| {
                node.kind == NodeKind::Material
                    && node.manufacturer_id == manufacturer_id
                    && node.name.eq_ignore_ascii_case(name)
            })
            .cloned())
    }

    async fn insert_node(&mut self, node: &GlobalNode) -> SheetscanResult<()> {
        if !self.working.manufacturers.contains_key(&node.manufacturer_id) {
            return Err(SheetscanError::not_found(format!(
                "manufacturer {}",
                node.manufacturer_id
            )));
        }
        if self.working.nodes.contains_key(&node.id) {
            return Err(SheetscanError::conflict(format!("node {} already exists", node.id)));
        }
        self.working.nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn update_status(&mut self, id: Uuid, assessment: StatusAssessment) -> SheetscanResult<()> {
        let node = self
            .working
            .nodes
            .get_mut(&id)
            .ok_or_else(|| SheetscanError::not_found(format!("node {}", id)))?;
        node.status = assessment.status;
        node.status_source = assessment.source;
        node.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_edge(&mut self, edge: &HierarchyEdge) -> SheetscanResult<()> {
        for id in [edge.parent_id, edge.child_id] {
            if !self.working.nodes.contains_key(&id) {
                return Err(SheetscanError::not_found(format!("node {}", id)));
            }
        }
        self.working
            .edges
            .insert((edge.parent_id, edge.child_id), edge.clone());
        Ok(())
    }

    async fn children_of(&mut self, parent_id: Uuid) -> SheetscanResult<Vec<GlobalNode>> {
        let children = self
            .working
            .edges
            .range((parent_id, Uuid::nil())..=(parent_id, Uuid::from_u128(u128::MAX)))
            .filter_map(|((_, child), _)| self.working.nodes.get(child).cloned())
            .collect();
        Ok(GraphSnapshot::sorted(children))
    }

    async fn parents_of(&mut self, child_id: Uuid) -> SheetscanResult<Vec<GlobalNode>> {
        let parents = self
            .working
            .edges
            .keys()
            .filter(|(_, child)| *child == child_id)
            .filter_map(|(parent, _)| self.working.nodes.get(parent).cloned())
            .collect();
        Ok(GraphSnapshot::sorted(parents))
    }

    async fn commit(self: Box<Self>) -> SheetscanResult<()> {
        let MemoryGraphTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> SheetscanResult<()> {
        Ok(())
    }
}
