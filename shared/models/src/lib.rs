//! # Sheetscan domain models
//!
//! Types shared by the analysis worker and the storage layer.
//!
//! - **document**: analysis jobs, page and file results, lifecycle markers
//! - **ocr**: the vision OCR read-result payload
//! - **pfas**: the status resolution engine (aggregation and assertion merge)
//! - **node**: material/chemical graph nodes, edges, manufacturers
//! - **extraction**: structured records coming out of document extraction
//! - **queue**: the work queue message envelope

pub mod document;
pub mod extraction;
pub mod node;
pub mod ocr;
pub mod pfas;
pub mod queue;

#[cfg(test)]
pub mod property_tests;

pub use document::*;
pub use extraction::*;
pub use node::*;
pub use ocr::*;
pub use pfas::*;
pub use queue::*;
