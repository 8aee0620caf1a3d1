//! 按配置划分一个新数据集并打印统计.
//!
//! 用法: `make-dataset [features.npz]`

use std::path::PathBuf;
use std::process::ExitCode;

use log::error;

mod result;
mod runner;

fn main() -> ExitCode {
    if let Err(e) = simple_logger::init_with_level(log::Level::Info) {
        eprintln!("{e}");
    }
    let npz = std::env::args().nth(1).map(PathBuf::from);

    match runner::run(npz.as_deref()) {
        Ok(report) => match report.analyze() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
