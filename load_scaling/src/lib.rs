pub mod archive;
pub mod data_loader;
pub mod disaggregation;
pub mod models;
pub mod normalizer;
pub mod observer;
pub mod pipeline;
pub mod resolver;
pub mod scaler;

pub use archive::{read_archive, write_archive, ArchiveError, ArchiveFrame};
pub use disaggregation::BalancingAreaMap;
pub use models::{
    ControlTotalsTable, HourlyProfileTable, MultiYearProfile, ScalingFactorMap, StateProfile,
    SubsectorGroup, SummaryShapeTable,
};
pub use normalizer::{ProjectionConfig, RatioNormalizer};
pub use observer::{LogObserver, ScalingEvent, ScalingObserver};
pub use pipeline::{PipelineConfig, ScalingPipeline};
pub use resolver::ScalingFactorResolver;
pub use scaler::ProfileScaler;
