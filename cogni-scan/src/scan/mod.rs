//! 扫描、患者与患者集合.

mod collection;
mod features;
mod patient;
mod record;
mod status;

pub use collection::{remove_missing_scans, CollectionSummary, PatientCollectionIndex};
pub use features::{FeatureExtractor, ScanFeatures, SliceCode};
pub use patient::{PatientAggregate, PatientSummary};
pub use record::{ScanRecord, ScanState, TrackedState};
pub use status::{HealthStatus, LabelFilter, PatientLabel, ValidationFilter, ValidationStatus};
