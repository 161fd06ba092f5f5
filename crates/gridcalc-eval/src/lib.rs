pub mod engine;
pub mod error;
pub mod telemetry;

pub use engine::{
    CacheStats, CacheSubsystem, Engine, EvalConfig, ExecutionMode, PassReport, PassStats,
    PatternConfig, SlowFormula, TimeoutScope, new_engine,
};
pub use error::RecalcError;
