//! Entry points for loading [`ConductorConfig`].

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::ConductorConfig;
use crate::error::OrchestratorError;
use config::{Config, Environment, File};
use std::path::Path;
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, global file, workspace files, then `CONDUCTOR__SECTION__KEY` env vars.
    pub fn load(workspace_root: &Path) -> Result<ConductorConfig, OrchestratorError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(
            Environment::with_prefix("CONDUCTOR")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: ConductorConfig = builder.build()?.try_deserialize()?;
        if config.workspace_root.is_none() {
            config.workspace_root = Some(workspace_root.to_path_buf());
        }
        debug!(workspace = %workspace_root.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load a single explicit file on top of the defaults.
    pub fn load_from_file(path: &Path) -> Result<ConductorConfig, OrchestratorError> {
        let config = Config::builder()
            .add_source(File::from(path.to_path_buf()))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn default() -> ConductorConfig {
        ConductorConfig::default()
    }
}
