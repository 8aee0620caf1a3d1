//! 划分结果.

use std::io::{self, Write};

use cogni_scan::dataset::{PoolStats, ScanDataset, StoredDataset};

/// 将池统计 `p` 写进 `w` 中.
fn describe_into<W: Write>(name: &str, p: &PoolStats, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "Pool `{name}`:")?;
    writeln!(w, "{S4}Scans: {}", p.total_scans)?;
    writeln!(w, "{S4}Distinct patients: {}", p.distinct_patients)?;
    for (label, n) in p.scans_per_label.iter() {
        let patients = p.patients_per_label.get(label).copied().unwrap_or(0);
        writeln!(w, "{S4}{label}: {n} scans from {patients} patients")?;
    }
    write!(w, "{S4}Labels: {}", p.scans_per_label.len())?;
    Ok(())
}

/// 新建数据集的最终结果.
pub struct DatasetReport {
    dataset: StoredDataset,
}

impl DatasetReport {
    pub fn new(dataset: StoredDataset) -> Self {
        Self { dataset }
    }

    /// 打印数据集统计.
    pub fn analyze(&self) -> io::Result<()> {
        let mut buf = Vec::with_capacity(1024);
        self.write_into(&mut buf)?;
        print!("{}", String::from_utf8_lossy(&buf));
        Ok(())
    }

    /// 将统计写进 `w` 中, 各段之间以分隔线隔开.
    fn write_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        utils::sep_to(&mut *w)?;
        writeln!(w, "Dataset {}: {}", self.dataset.dataset_id(), self.dataset.description())?;
        utils::sep_to(&mut *w)?;

        let stats = self.dataset.stats();
        let pools = [
            ("train", &stats.training),
            ("validation", &stats.validation),
            ("test", &stats.testing),
        ];
        for (key, pool) in pools {
            describe_into(key, pool, w)?;
            writeln!(w)?;
            utils::sep_to(&mut *w)?;
        }
        Ok(())
    }
}
