use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::pfas::{InformationSource, PfasStatus, StatusAssessment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeKind {
    Material,
    Chemical,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Material => "MATERIAL",
            Self::Chemical => "CHEMICAL",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MATERIAL" => Ok(Self::Material),
            "CHEMICAL" => Ok(Self::Chemical),
            other => Err(format!("Unknown node kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manufacturer {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Manufacturer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            address: None,
            country: None,
            created_at: Utc::now(),
        }
    }
}

/// A material or a chemical. Never deleted once observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalNode {
    pub id: Uuid,
    pub name: String,
    pub manufacturer_id: Uuid,
    pub kind: NodeKind,
    pub cas_number: Option<String>,
    pub status: PfasStatus,
    pub status_source: InformationSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GlobalNode {
    pub fn material(name: impl Into<String>, manufacturer_id: Uuid) -> Self {
        Self::new(name, manufacturer_id, NodeKind::Material, None, StatusAssessment::unknown())
    }

    pub fn chemical(
        name: impl Into<String>,
        manufacturer_id: Uuid,
        cas_number: Option<String>,
        assessment: StatusAssessment,
    ) -> Self {
        Self::new(name, manufacturer_id, NodeKind::Chemical, cas_number, assessment)
    }

    fn new(
        name: impl Into<String>,
        manufacturer_id: Uuid,
        kind: NodeKind,
        cas_number: Option<String>,
        assessment: StatusAssessment,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            manufacturer_id,
            kind,
            cas_number,
            status: assessment.status,
            status_source: assessment.source,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn assessment(&self) -> StatusAssessment {
        StatusAssessment::new(self.status, self.status_source)
    }

    /// Returns true when the stored pair actually changed.
    pub fn apply(&mut self, assessment: StatusAssessment) -> bool {
        if self.assessment() == assessment {
            return false;
        }
        self.status = assessment.status;
        self.status_source = assessment.source;
        self.updated_at = Utc::now();
        true
    }
}

/// Composition edge from a material to one of its chemicals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyEdge {
    pub parent_id: Uuid,
    pub child_id: Uuid,
    pub weight_percent: Option<f64>,
}
