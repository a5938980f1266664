pub mod logging;

pub use logging::{init_structured_logging, LogConfig, LogFormat};
