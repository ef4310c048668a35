use crate::error::GateError;
use tracing::{info, warn};

pub const DEFAULT_MODULE_NAME: &str = "rogate";
pub const PRELOAD_OPTION: &str = "shared_preload_libraries";
pub const CANCEL_ON_ENGAGE_OPTION: &str = "rogate.cancel_on_engage";

/// Read access to host configuration options.
pub trait SettingsSource {
    fn get_setting(&self, name: &str) -> Option<String>;
}

/// Runtime configuration for the read-only gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Name the module must appear under in the preload list.
    pub module_name: String,
    /// Host option holding the preload list.
    pub preload_option: String,
    /// Shared segment and lock tranche name.
    pub shmem_segment: String,
    /// Cancel transactions holding a transaction id when read-only mode is
    /// engaged.
    pub cancel_on_engage: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            module_name: DEFAULT_MODULE_NAME.to_string(),
            preload_option: PRELOAD_OPTION.to_string(),
            shmem_segment: DEFAULT_MODULE_NAME.to_string(),
            cancel_on_engage: true,
        }
    }
}

impl GateConfig {
    /// Defaults overlaid with the module's own host options. Values that do
    /// not parse are logged and ignored.
    pub fn from_settings(settings: &dyn SettingsSource) -> Self {
        let mut config = Self::default();
        if let Some(raw) = settings.get_setting(CANCEL_ON_ENGAGE_OPTION) {
            match bool_setting(CANCEL_ON_ENGAGE_OPTION, &raw) {
                Ok(value) => config.cancel_on_engage = value,
                Err(err) => warn!(error = %err, "ignoring setting"),
            }
        }
        config
    }

    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    pub fn with_shmem_segment(mut self, name: impl Into<String>) -> Self {
        self.shmem_segment = name.into();
        self
    }

    pub fn with_cancel_on_engage(mut self, cancel: bool) -> Self {
        self.cancel_on_engage = cancel;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enablement {
    Enabled,
    /// The preload list exists but does not name the module.
    NotListed,
    /// The preload option could not be read at all.
    OptionMissing,
}

impl Enablement {
    pub fn is_enabled(self) -> bool {
        matches!(self, Enablement::Enabled)
    }
}

/// Decides at load time whether the gate is active for this host lifetime.
/// Never fails: a missing or incomplete declaration only disables the gate.
pub fn inspect_enablement(settings: &dyn SettingsSource, config: &GateConfig) -> Enablement {
    let list = match preload_list(settings, config) {
        Ok(list) => list,
        Err(err) => {
            warn!(
                error = %err,
                module = config.module_name.as_str(),
                "read-only gate disabled"
            );
            return Enablement::OptionMissing;
        }
    };
    if preload_list_contains(&list, &config.module_name) {
        info!(module = config.module_name.as_str(), "read-only gate is enabled");
        Enablement::Enabled
    } else {
        warn!(
            option = config.preload_option.as_str(),
            module = config.module_name.as_str(),
            "module not preloaded, read-only gate disabled"
        );
        Enablement::NotListed
    }
}

pub fn preload_list(
    settings: &dyn SettingsSource,
    config: &GateConfig,
) -> Result<String, GateError> {
    settings
        .get_setting(&config.preload_option)
        .ok_or_else(|| GateError::ConfigurationMissing {
            option: config.preload_option.clone(),
        })
}

/// Matches `module` against a comma separated library list. Entries may be
/// quoted and may carry a directory prefix or a shared-library extension.
pub fn preload_list_contains(list: &str, module: &str) -> bool {
    list.split(',')
        .map(|entry| entry.trim().trim_matches(|c: char| c == '"' || c == '\''))
        .filter(|entry| !entry.is_empty())
        .map(library_stem)
        .any(|stem| stem == module)
}

fn library_stem(entry: &str) -> &str {
    let file = entry.rsplit('/').next().unwrap_or(entry);
    [".so", ".dylib", ".dll"]
        .iter()
        .find_map(|ext| file.strip_suffix(ext))
        .unwrap_or(file)
}

pub fn bool_setting(name: &str, raw: &str) -> Result<bool, GateError> {
    parse_bool(raw).ok_or_else(|| GateError::InvalidSetting {
        name: name.to_string(),
        value: raw.to_string(),
    })
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}
