//! Structured records produced by document extraction and consumed by the
//! graph. Free-form tag strings are closed into [`PfasTag`] here so nothing
//! downstream compares strings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use validator::{Validate, ValidationError};

use crate::pfas::{InformationSource, PfasStatus, StatusAssessment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PfasTag {
    Pfas,
    NoPfas,
    Pending,
}

impl PfasTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pfas => "PFAS",
            Self::NoPfas => "NO_PFAS",
            Self::Pending => "PENDING",
        }
    }

    /// Anything the extractor did not clearly label stays pending.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "PFAS" => Self::Pfas,
            "NO_PFAS" => Self::NoPfas,
            _ => Self::Pending,
        }
    }

    pub fn status(&self) -> PfasStatus {
        match self {
            Self::Pfas => PfasStatus::Yes,
            Self::NoPfas => PfasStatus::No,
            Self::Pending => PfasStatus::Pending,
        }
    }
}

impl Serialize for PfasTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PfasTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(PfasTag::parse_lenient).unwrap_or(PfasTag::Pending))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ManufacturerRecord {
    #[validate(length(min = 1, max = 255, message = "Manufacturer name is required"))]
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ChemicalRecord {
    #[validate(length(min = 1, max = 255, message = "Chemical name is required"))]
    pub chemical_name: String,
    #[serde(default)]
    #[validate(custom = "validate_cas_number")]
    pub cas_number: Option<String>,
    /// Weight percent within the material.
    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0, message = "Composition must be between 0 and 100"))]
    pub composition: Option<f64>,
    #[serde(default = "default_tag")]
    pub tag: PfasTag,
    #[serde(default = "default_source")]
    pub source: InformationSource,
}

fn default_tag() -> PfasTag {
    PfasTag::Pending
}

fn default_source() -> InformationSource {
    InformationSource::Vai
}

impl ChemicalRecord {
    pub fn assessment(&self) -> StatusAssessment {
        StatusAssessment::new(self.tag.status(), self.source)
    }

    /// Blank CAS strings from the extractor mean "not stated".
    pub fn normalized_cas(&self) -> Option<&str> {
        self.cas_number
            .as_deref()
            .map(str::trim)
            .filter(|cas| !cas.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MaterialRecord {
    #[validate(length(min = 1, max = 255, message = "Material name is required"))]
    pub material_name: String,
    #[validate]
    pub manufacturer: ManufacturerRecord,
    #[validate]
    pub chemicals: Vec<ChemicalRecord>,
}

fn validate_cas_number(cas_number: &str) -> Result<(), ValidationError> {
    let trimmed = cas_number.trim();
    if trimmed.is_empty() || is_cas_format(trimmed) {
        return Ok(());
    }
    Err(ValidationError::new("invalid_cas_format"))
}

/// `NNNNNNN-NN-N`: 2 to 7 digits, 2 digits, 1 check digit.
pub fn is_cas_format(cas_number: &str) -> bool {
    let parts: Vec<&str> = cas_number.split('-').collect();
    if parts.len() != 3 {
        return false;
    }

    if parts[0].len() < 2 || parts[0].len() > 7 || parts[1].len() != 2 || parts[2].len() != 1 {
        return false;
    }

    parts.iter().all(|part| part.chars().all(|c| c.is_ascii_digit()))
}

/// Format plus the weighted check digit.
pub fn is_valid_cas(cas_number: &str) -> bool {
    if !is_cas_format(cas_number) {
        return false;
    }

    let digits: Vec<u32> = cas_number.chars().filter_map(|c| c.to_digit(10)).collect();
    let Some((check, body)) = digits.split_last() else {
        return false;
    };

    let sum: u32 = body
        .iter()
        .rev()
        .enumerate()
        .map(|(i, digit)| digit * (i as u32 + 1))
        .sum();

    sum % 10 == *check
}
