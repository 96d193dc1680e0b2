//! Writes extracted materials into the entity graph and keeps every
//! material's status consistent with its chemicals.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use sheetscan_models::{
    merge_assertion, resolve_parent, GlobalNode, HierarchyEdge, MaterialRecord, NodeKind,
    StatusAssessment,
};
use sheetscan_storage::{GraphStore, GraphTx};
use sheetscan_utils::{validate_model, SheetscanError, SheetscanResult};

use crate::metrics::Metrics;

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub material_id: Uuid,
    pub material_status: StatusAssessment,
    pub chemical_ids: Vec<Uuid>,
    /// Materials whose status was recomputed, this one included.
    pub recomputed: usize,
}

pub struct ResolutionService {
    graph: Arc<dyn GraphStore>,
    metrics: Arc<Metrics>,
}

impl ResolutionService {
    pub fn new(graph: Arc<dyn GraphStore>, metrics: Arc<Metrics>) -> Self {
        Self { graph, metrics }
    }

    /// Records one extracted material and its composition.
    ///
    /// All writes share one transaction. An illegal source transition on any
    /// chemical rolls back the whole record.
    pub async fn ingest_material(&self, record: &MaterialRecord) -> SheetscanResult<IngestOutcome> {
        validate_model(record)?;

        let mut tx = self.graph.begin().await?;
        let result = ingest(tx.as_mut(), record).await;
        let outcome = self.settle(tx, result).await?;

        info!(
            material = %record.material_name,
            material_id = %outcome.material_id,
            status = %outcome.material_status,
            chemicals = outcome.chemical_ids.len(),
            recomputed = outcome.recomputed,
            "Material ingested"
        );
        Ok(outcome)
    }

    /// Applies new evidence to one chemical and propagates it to every
    /// material that contains it.
    pub async fn assert_chemical(
        &self,
        chemical_id: Uuid,
        assessment: StatusAssessment,
    ) -> SheetscanResult<StatusAssessment> {
        let mut tx = self.graph.begin().await?;
        let result = assert_in(tx.as_mut(), chemical_id, assessment).await;
        self.settle(tx, result).await
    }

    pub async fn recompute_material(&self, material_id: Uuid) -> SheetscanResult<StatusAssessment> {
        let mut tx = self.graph.begin().await?;
        let result = recompute(tx.as_mut(), material_id).await;
        self.settle(tx, result).await
    }

    async fn settle<T>(&self, tx: Box<dyn GraphTx>, result: SheetscanResult<T>) -> SheetscanResult<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(error = %rollback_error, "Graph rollback failed");
                }
                if matches!(error, SheetscanError::StatusResolution { .. }) {
                    self.metrics.illegal_transitions.inc();
                }
                Err(error)
            }
        }
    }
}

async fn ingest(tx: &mut dyn GraphTx, record: &MaterialRecord) -> SheetscanResult<IngestOutcome> {
    let manufacturer = tx
        .upsert_manufacturer(
            &record.manufacturer.name,
            record.manufacturer.address.as_deref(),
            record.manufacturer.country.as_deref(),
        )
        .await?;

    let material = match tx.find_material(manufacturer.id, &record.material_name).await? {
        Some(existing) => existing,
        None => {
            let node = GlobalNode::material(&record.material_name, manufacturer.id);
            tx.insert_node(&node).await?;
            node
        }
    };

    let mut chemical_ids = Vec::with_capacity(record.chemicals.len());
    for chemical in &record.chemicals {
        let incoming = chemical.assessment();
        let cas_number = chemical.normalized_cas();

        let node = match tx
            .find_chemical(manufacturer.id, cas_number, &chemical.chemical_name)
            .await?
        {
            Some(existing) => {
                let merged = merge_assertion(existing.assessment(), incoming)
                    .map_err(|e| illegal(&existing, e))?;
                if merged != existing.assessment() {
                    tx.update_status(existing.id, merged).await?;
                }
                existing
            }
            None => {
                let node = GlobalNode::chemical(
                    &chemical.chemical_name,
                    manufacturer.id,
                    cas_number.map(str::to_string),
                    incoming,
                );
                tx.insert_node(&node).await?;
                node
            }
        };

        tx.upsert_edge(&HierarchyEdge {
            parent_id: material.id,
            child_id: node.id,
            weight_percent: chemical.composition,
        })
        .await?;

        if !chemical_ids.contains(&node.id) {
            chemical_ids.push(node.id);
        }
    }

    let mut parents = BTreeSet::from([material.id]);
    for chemical_id in &chemical_ids {
        parents.extend(tx.parents_of(*chemical_id).await?.into_iter().map(|p| p.id));
    }

    let mut material_status = StatusAssessment::unknown();
    for parent_id in &parents {
        let resolved = recompute(tx, *parent_id).await?;
        if *parent_id == material.id {
            material_status = resolved;
        }
    }

    Ok(IngestOutcome {
        material_id: material.id,
        material_status,
        chemical_ids,
        recomputed: parents.len(),
    })
}

async fn assert_in(
    tx: &mut dyn GraphTx,
    chemical_id: Uuid,
    assessment: StatusAssessment,
) -> SheetscanResult<StatusAssessment> {
    let chemical = tx
        .get_node(chemical_id)
        .await?
        .ok_or_else(|| SheetscanError::not_found(format!("chemical {}", chemical_id)))?;
    if chemical.kind != NodeKind::Chemical {
        return Err(SheetscanError::validation(
            "chemical_id",
            format!("{} is a {}, not a chemical", chemical_id, chemical.kind),
        ));
    }

    let merged = merge_assertion(chemical.assessment(), assessment).map_err(|e| illegal(&chemical, e))?;
    if merged != chemical.assessment() {
        tx.update_status(chemical_id, merged).await?;
    }

    for parent in tx.parents_of(chemical_id).await? {
        recompute(tx, parent.id).await?;
    }
    Ok(merged)
}

/// Re-derives a material's status from its full child set.
async fn recompute(tx: &mut dyn GraphTx, material_id: Uuid) -> SheetscanResult<StatusAssessment> {
    let node = tx
        .get_node(material_id)
        .await?
        .ok_or_else(|| SheetscanError::not_found(format!("material {}", material_id)))?;

    let children: Vec<StatusAssessment> = tx
        .children_of(material_id)
        .await?
        .iter()
        .map(GlobalNode::assessment)
        .collect();
    let resolved = resolve_parent(&children);

    if node.assessment() != resolved {
        tx.update_status(material_id, resolved).await?;
    }
    Ok(resolved)
}

fn illegal(node: &GlobalNode, error: sheetscan_models::ResolutionError) -> SheetscanError {
    SheetscanError::status_resolution(format!("{} ({}): {}", node.name, node.id, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetscan_models::{
        ChemicalRecord, InformationSource, ManufacturerRecord, PfasStatus, PfasTag,
    };
    use sheetscan_storage::MemoryGraphStore;

    fn chemical(name: &str, cas: Option<&str>, tag: PfasTag, source: InformationSource) -> ChemicalRecord {
        ChemicalRecord {
            chemical_name: name.to_string(),
            cas_number: cas.map(str::to_string),
            composition: Some(10.0),
            tag,
            source,
        }
    }

    fn record(material: &str, chemicals: Vec<ChemicalRecord>) -> MaterialRecord {
        MaterialRecord {
            material_name: material.to_string(),
            manufacturer: ManufacturerRecord {
                name: "Acme Polymers".to_string(),
                address: None,
                country: Some("DE".to_string()),
            },
            chemicals,
        }
    }

    fn service() -> (ResolutionService, MemoryGraphStore) {
        let graph = MemoryGraphStore::new();
        let service = ResolutionService::new(Arc::new(graph.clone()), Arc::new(Metrics::unregistered()));
        (service, graph)
    }

    fn ptfe(tag: PfasTag, source: InformationSource) -> ChemicalRecord {
        chemical("Polytetrafluoroethylene", Some("9002-84-0"), tag, source)
    }

    #[tokio::test]
    async fn test_new_material_aggregates_its_chemicals() {
        let (service, _) = service();
        let outcome = service
            .ingest_material(&record(
                "Gasket",
                vec![
                    ptfe(PfasTag::Pending, InformationSource::Vai),
                    chemical("Water", Some("7732-18-5"), PfasTag::NoPfas, InformationSource::Vai),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.chemical_ids.len(), 2);
        assert_eq!(
            outcome.material_status,
            StatusAssessment::new(PfasStatus::Pending, InformationSource::Vai)
        );
    }

    #[tokio::test]
    async fn test_material_without_chemicals_is_pending() {
        let (service, _) = service();
        let outcome = service.ingest_material(&record("Empty", vec![])).await.unwrap();
        assert_eq!(outcome.material_status, StatusAssessment::unknown());
    }

    #[tokio::test]
    async fn test_chemical_status_fans_out_to_every_material() {
        let (service, graph) = service();
        let m1 = service
            .ingest_material(&record("M1", vec![ptfe(PfasTag::Pending, InformationSource::Vai)]))
            .await
            .unwrap();
        let m2 = service
            .ingest_material(&record("M2", vec![ptfe(PfasTag::NoPfas, InformationSource::Vai)]))
            .await
            .unwrap();
        assert_eq!(m1.chemical_ids, m2.chemical_ids);

        let confirmed = StatusAssessment::new(PfasStatus::Yes, InformationSource::Oecd);
        let merged = service
            .assert_chemical(m1.chemical_ids[0], confirmed)
            .await
            .unwrap();
        assert_eq!(merged, confirmed);

        let snapshot = graph.snapshot().await;
        for material in [m1.material_id, m2.material_id] {
            assert_eq!(snapshot.node(material).unwrap().assessment(), confirmed);
        }
    }

    #[tokio::test]
    async fn test_registry_status_survives_model_evidence() {
        let (service, graph) = service();
        let first = service
            .ingest_material(&record("M1", vec![ptfe(PfasTag::Pfas, InformationSource::Oecd)]))
            .await
            .unwrap();

        service
            .ingest_material(&record("M1", vec![ptfe(PfasTag::NoPfas, InformationSource::Vai)]))
            .await
            .unwrap();

        let snapshot = graph.snapshot().await;
        let chemical = snapshot.node(first.chemical_ids[0]).unwrap();
        assert_eq!(
            chemical.assessment(),
            StatusAssessment::new(PfasStatus::Yes, InformationSource::Oecd)
        );
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.edges.len(), 1);
    }

    #[tokio::test]
    async fn test_illegal_transition_rolls_back_the_whole_record() {
        let (service, graph) = service();
        service
            .ingest_material(&record("M1", vec![ptfe(PfasTag::NoPfas, InformationSource::Manual)]))
            .await
            .unwrap();
        let before = graph.snapshot().await;

        let error = service
            .ingest_material(&record(
                "M2",
                vec![
                    chemical("Silica", None, PfasTag::NoPfas, InformationSource::Vai),
                    ptfe(PfasTag::Pfas, InformationSource::Oecd),
                ],
            ))
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "STATUS_RESOLUTION_ERROR");
        assert_eq!(service.metrics.illegal_transitions.get(), 1);

        let after = graph.snapshot().await;
        assert_eq!(after.nodes.len(), before.nodes.len());
        assert_eq!(after.edges.len(), before.edges.len());
        assert!(after.node_named(NodeKind::Material, "M2").is_none());
    }

    #[tokio::test]
    async fn test_recompute_material() {
        let (service, graph) = service();
        let outcome = service
            .ingest_material(&record("M1", vec![ptfe(PfasTag::NoPfas, InformationSource::Vai)]))
            .await
            .unwrap();

        let resolved = service.recompute_material(outcome.material_id).await.unwrap();
        assert_eq!(resolved, StatusAssessment::new(PfasStatus::No, InformationSource::Vai));
        assert_eq!(
            graph.snapshot().await.node(outcome.material_id).unwrap().assessment(),
            resolved
        );
    }

    #[tokio::test]
    async fn test_asserting_on_a_material_is_rejected() {
        let (service, _) = service();
        let outcome = service.ingest_material(&record("M1", vec![])).await.unwrap();

        let error = service
            .assert_chemical(
                outcome.material_id,
                StatusAssessment::new(PfasStatus::Yes, InformationSource::Manual),
            )
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "VALIDATION_ERROR");
    }
}
