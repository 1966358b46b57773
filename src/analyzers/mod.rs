pub mod temporal_analyzer;

pub use temporal_analyzer::{
    analyze_temporal, GapInterval, MonthlyMean, QuarterlyMean, SeriesPoint, StationTemporalAnalysis,
    TemporalAnalysisResult, TemporalAnalyzer, Trend,
};
