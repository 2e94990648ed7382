pub mod app_config;
pub mod config;
pub mod entity;
pub mod facts;
pub mod inference;
pub mod platform;
pub mod records;
pub mod resolver;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use entity::EntityKind;
pub use facts::{FunnelCounts, MetricTriad, UnifiedDailyMetric, UnifiedDailyNoteMetric};
pub use inference::{
    infer_business_model, load_inference_rules, AgencyOverride, InferenceInput, InferenceRules,
    FEED_MODEL, LIVESTREAM_MODEL,
};
pub use platform::Platform;
pub use records::{
    AbbreviationRecord, AbbreviationType, ConversionRecord, MappingKey, MappingRecord,
    NaturalKey, NoteAuthorityRecord, NotePaidRecord, NoteTotalRecord, SpendRecord,
};
pub use resolver::{MappingIndex, Resolution};

use thiserror::Error;

/// Agency written into auto-created mapping rows for accounts nobody has
/// assigned yet. Operators search for this value to find follow-up work.
pub const UNASSIGNED_AGENCY: &str = "unassigned";

/// Placeholder for note dimension fields no source could supply.
pub const UNKNOWN_DIMENSION: &str = "unknown";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read rules file {path}: {source}")]
    RulesFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rules file: {0}")]
    RulesFileParse(#[from] serde_yaml::Error),

    #[error("rules validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("unknown entity type: {0}")]
    UnknownEntity(String),
}
