pub mod aggregator;
pub mod alerts;
pub mod anomaly;
pub mod patterns;
pub mod reputation;
pub mod threat;
