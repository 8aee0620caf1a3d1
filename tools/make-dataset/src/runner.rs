//! 程序运行函数.

use std::path::Path;

use cogni_scan::dataset::{DatasetSplitter, ScanDataset, ScanPatientLookup, StoredDataset};
use cogni_scan::scan::SliceCode;
use cogni_scan::Result;
use log::info;
use utils::loader;

use crate::result::DatasetReport;

/// 实际运行.
///
/// 按配置划分并持久化一个新数据集; 给出 `npz` 时同时导出全部九张切片的特征矩阵.
pub fn run(npz: Option<&Path>) -> Result<DatasetReport> {
    let settings = loader::settings_from_env_or_home()?;
    let config = settings.split_config()?;
    let mut store = loader::open_store(&settings)?;

    println!("Making dataset ({})...", config.description());
    let mut rng = rand::rng();
    let record = DatasetSplitter::new(config).make_dataset(&mut store, &mut rng)?;

    let lookup = ScanPatientLookup::build(&store)?;
    let dataset = StoredDataset::new(record, &lookup)?;

    if let Some(path) = npz {
        let slices: Vec<SliceCode> = SliceCode::all().collect();
        dataset
            .features(&store, &slices, settings.negative_label, &mut rng)?
            .write_npz(path)?;
        info!("features written to {}", path.display());
    }
    Ok(DatasetReport::new(dataset))
}
