pub mod coordinate_validator;
pub mod filter_engine;
pub mod join_reconciler;
pub mod station_aggregator;

pub use coordinate_validator::{
    validate_coordinates, CoordinateFlags, CoordinateValidationReport, CoordinateValidator,
    RowValidation,
};
pub use filter_engine::{
    environmental_filter, filter, AbsentValue, ColumnRange, Condition, ConditionStats,
    Connective, FilterEngine, FilterPreset, FilterSpec, FilterStats, NumericRange, Operand,
    Operator, Predicate, RemovedRow, Scalar, Term, ValueCounts,
};
pub use join_reconciler::{
    join_stations_with_readings, JoinKind, JoinQualityReport, JoinReconciler, NearMiss,
    NearMissKind,
};
pub use station_aggregator::{
    aggregate_by_station, AggregationReport, FieldStats, StationAggregator, StationSummary,
};
