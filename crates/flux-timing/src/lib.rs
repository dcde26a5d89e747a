mod duration;
mod global_clock;
mod ingestion_time;
mod instant;
mod internal_message;
mod nanos;
mod publish_delta;
mod repeater;
mod tracking_timestamp;

pub use duration::Duration;
pub use global_clock::{
    Clock, OurClockForNanos, global_clock, global_clock_not_mocked, init_global_with_mock,
};
pub use ingestion_time::IngestionTime;
pub use instant::Instant;
pub use internal_message::InternalMessage;
pub use nanos::Nanos;
pub use publish_delta::PublishDelta;
pub use repeater::Repeater;
pub use tracking_timestamp::TrackingTimestamp;
