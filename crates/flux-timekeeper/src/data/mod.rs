pub use self::{
    bucketed_data_cache::BucketedDataCache, statistics::Statistics, tile_metrics::TileMetricsView,
};
pub mod utils;

mod bucketed_data;
mod bucketed_data_cache;
mod circular_buffer;
mod statistics;
mod tile_metrics;
