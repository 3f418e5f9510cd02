//! Load `.photodex.toml` from a library root. Values present in the file override
//! [`StoreSettings`] defaults; a missing file means defaults.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::utils::config::{PackagePaths, StoreSettings};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PhotodexToml {
    #[serde(default)]
    store: StoreSection,
}

#[derive(Debug, Default, Deserialize)]
struct StoreSection {
    busy_timeout_ms: Option<u64>,
    busy_retries: Option<u32>,
    read_pool_size: Option<usize>,
    pool_checkout_timeout_ms: Option<u64>,
    batch_size: Option<usize>,
    lock_timeout_ms: Option<u64>,
    lock_stale_after_secs: Option<u64>,
}

/// Parse a config document. Errors are returned so tests can check them; callers log and ignore.
pub(crate) fn parse_photodex_toml(s: &str) -> Result<PhotodexToml, toml::de::Error> {
    toml::from_str(s)
}

/// Load `.photodex.toml` from `root` if present. Returns None if the file is missing or invalid.
pub(crate) fn load_photodex_toml(root: &Path) -> Option<PhotodexToml> {
    let path = root.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    parse_photodex_toml(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite a settings field from the file when present.
macro_rules! apply_file_opt {
    ($section:expr, $field:ident => $target:expr, $conv:expr) => {
        if let Some(v) = $section.$field {
            $target = $conv(v);
        }
    };
}

/// Apply file config over `settings`. Zero sizes are ignored so a typo cannot disable the pool.
pub(crate) fn apply_file_to_settings(file: &PhotodexToml, settings: &mut StoreSettings) {
    let s = &file.store;
    apply_file_opt!(s, busy_timeout_ms => settings.connection.busy_timeout, Duration::from_millis);
    apply_file_opt!(s, busy_retries => settings.connection.busy_retries, |v| v);
    apply_file_opt!(
        s,
        pool_checkout_timeout_ms => settings.connection.pool_checkout_timeout,
        Duration::from_millis
    );
    apply_file_opt!(s, lock_timeout_ms => settings.lock_timeout, Duration::from_millis);
    apply_file_opt!(s, lock_stale_after_secs => settings.lock_stale_after, Duration::from_secs);
    if let Some(n) = s.read_pool_size.filter(|n| *n > 0) {
        settings.connection.read_pool_size = n;
    }
    if let Some(n) = s.batch_size.filter(|n| *n > 0) {
        settings.batch_size = n;
    }
}

/// Defaults with `<root>/.photodex.toml` applied on top.
pub fn load_store_settings(root: &Path) -> StoreSettings {
    let mut settings = StoreSettings::default();
    if let Some(file) = load_photodex_toml(root) {
        apply_file_to_settings(&file, &mut settings);
    }
    settings
}
