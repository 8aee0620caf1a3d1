//! 🧠欢迎光临🩻
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d, PatientId, ScanId};
pub use crate::{Error, Result};

pub use crate::config::Settings;

pub use crate::volume::{AxisMapping, NiftiDecoder, Orientation, Volume, VolumeDecoder};

pub use crate::scan::{
    FeatureExtractor, HealthStatus, LabelFilter, PatientAggregate, PatientCollectionIndex,
    PatientLabel, ScanRecord, SliceCode, ValidationFilter, ValidationStatus,
};

pub use crate::store::{FileStore, MemoryStore, ScanStore};

pub use crate::dataset::{
    DatasetRecord, DatasetSplitter, ScanDataset, ScanPatientLookup, SplitConfig, StoredDataset,
};
