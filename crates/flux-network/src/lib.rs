pub mod buffer;
pub mod error;
pub mod locator;
pub mod options;
pub mod registry;
pub mod tcp;

pub use buffer::{Buffer, OwnedBuffer};
pub use error::{RpcFailure, TransportError};
pub use locator::ServiceLocator;
pub use options::TransportOptions;
pub use registry::TransportRegistry;
