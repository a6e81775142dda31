//! Configuration loading and validation.
//!
//! Two INI surfaces: the process file (daemon and tool settings) and
//! the dataset file plus optional named templates. Every dataset gets
//! one fully merged, typed, validated [`DatasetConfig`] at load time.

mod load;
mod model;

pub use load::{
    LoadReport, dataset_config_path, load_dataset_configs, load_process_config, parse_fire_spec,
    reload_dataset_configs,
};
pub use model::{
    CONFIG_DIR, DEFAULT_BUFFER_SIZE, DatasetConfig, Direction, EndpointConfig, FireSpec,
    LEGACY_DATASET_CONFIG, LoggingConfig, ProcessConfig, RcmdConfig, ReplicateConfig,
    TRIGGER_SPEC,
};
