pub mod bus;
pub mod channel;
pub mod config;
pub mod device;
pub mod dsp;
pub mod effects;
pub mod error;
pub mod events;
pub mod meter;
pub mod mixer;
pub mod processor;
pub mod store;
pub mod transport;

pub use bus::EventBus;
pub use config::Config;
pub use error::AppError;
pub use processor::AudioProcessor;
pub use store::ParameterStore;
pub use transport::ControlTransport;
