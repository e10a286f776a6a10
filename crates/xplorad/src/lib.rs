#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod coordinator;
pub mod entity;
pub mod geo;
pub mod remote;
pub mod watch;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use coordinator::Coordinator;
pub use coordinator::CoordinatorSettings;
pub use entity::Entity;
pub use entity::EntityRegistry;
pub use geo::Geocoder;
pub use geo::HaversineGeocoder;
pub use remote::RemoteError;
pub use remote::WatchService;
pub use watch::WatchId;
pub use watch::WatchSnapshot;
pub use watch::WatchState;
