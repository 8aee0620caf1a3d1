//! 对 `cogni_scan::config` 与 `cogni_scan::store` 的更一层封装. 提供更直接的加载器.

use std::env;
use std::path::PathBuf;

use cogni_scan::config::Settings;
use cogni_scan::store::FileStore;
use cogni_scan::Result;
use log::info;

/// 覆盖存储路径的环境变量.
pub const STORE_ENV: &str = "COGNI_SCAN_STORE";

/// 从 `$COGNI_SCAN_HOME/settings.json` 或者 `$HOME/.cogni_scan/settings.json` 加载配置.
#[inline]
pub fn settings_from_env_or_home() -> Result<Settings> {
    Settings::load()
}

/// 获取存储文件路径.
///
/// 1. 若环境变量 `$COGNI_SCAN_STORE` 非空, 则返回其值;
/// 2. 否则, 返回配置中的 `store_path`.
pub fn store_path_from_env_or(settings: &Settings) -> PathBuf {
    match env::var(STORE_ENV) {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => settings.store_path.clone(),
    }
}

/// 打开存储. 文件不存在时得到空存储.
pub fn open_store(settings: &Settings) -> Result<FileStore> {
    let path = store_path_from_env_or(settings);
    info!("opening store at {}", path.display());
    FileStore::open(path)
}
