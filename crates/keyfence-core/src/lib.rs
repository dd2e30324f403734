//! # keyfence-core
//!
//! Core decision engine for keyfence, a geofenced property unlock service.
//!
//! A session asks for location permission, takes one high-accuracy position
//! fix, measures the great-circle distance to the property and only then lets
//! an unlock command through.
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`geo`] - Haversine distance between coordinates
//! - [`position`] - The device position boundary ([`GeoPositionSource`])
//! - [`session`] - Session states, verdicts and snapshots
//! - [`authorization`] - The per-session [`AuthorizationStateMachine`]
//! - [`unlock`] - Verdict-gated unlock commands and lock actuators
//! - [`retry`] - Manual and backoff retry of failed location checks
//! - [`catalog`] - Property lookup ([`PropertyCatalog`])
//! - [`config`] - Layered configuration loading, saving and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared value types and OpenAPI schemas
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use keyfence_core::{
//!     AuthorizationStateMachine, Coordinate, EvaluationSettings, PositionReport,
//!     PositionSample, PropertyTarget, ReportedPositionSource, SimulatedActuator,
//!     UnlockCommandExecutor,
//! };
//!
//! # async fn run() -> keyfence_core::Result<()> {
//! let target = PropertyTarget::new("12", Coordinate::new(37.7749, -122.4194)?);
//! let source = Arc::new(ReportedPositionSource::new());
//! source.submit(PositionReport::fix(PositionSample::now(
//!     Coordinate::new(37.77491, -122.41941)?,
//!     4.0,
//! )));
//!
//! let session = AuthorizationStateMachine::new(target, source, EvaluationSettings::default());
//! let snapshot = session.begin_evaluation().await?;
//!
//! if snapshot.can_unlock() {
//!     let executor = UnlockCommandExecutor::new(
//!         Arc::new(SimulatedActuator::default()),
//!         std::time::Duration::from_secs(10),
//!     );
//!     let outcome = executor.attempt_unlock(&session).await?;
//!     println!("{}", outcome.message);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod authorization;
pub mod catalog;
pub mod config;
pub mod error;
pub mod geo;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod position;
pub mod retry;
pub mod session;
pub mod types;
pub mod unlock;

// Re-export primary types for convenience
pub use authorization::{
    AuthorizationStateMachine, EvaluationSettings, DEFAULT_PERMISSION_TIMEOUT, DEFAULT_SAMPLE_TIMEOUT,
};
#[cfg(feature = "http")]
pub use catalog::HttpCatalog;
pub use catalog::{
    catalog_from_config, validate_property_id, CatalogError, DecimalDegrees, JsonFileCatalog,
    MemoryCatalog, PropertyCatalog, PropertyRecord,
};
pub use config::{
    default_data_dir, ActuatorKind, CatalogConfig, CatalogSource, Config, ConfigError,
    GeofenceConfig, PositionConfig, RetryConfig, ServerConfig, UnlockConfig,
};
pub use error::{KeyfenceError, NextAction, Result};
pub use geo::{distance_meters, within_radius, EARTH_MEAN_RADIUS_M};
pub use position::{
    GeoPositionSource, PermissionStatus, PositionError, PositionReport, ReportedPositionSource,
};
pub use retry::{RetryController, RetryPolicy};
pub use session::{AuthorizationSession, SessionState, Verdict, DEFAULT_GEOFENCE_RADIUS_M};
pub use types::{Coordinate, CoordinateError, PositionAccuracy, PositionSample, PropertyTarget};
#[cfg(feature = "http")]
pub use unlock::HttpActuator;
pub use unlock::{
    ActuatorError, SimulatedActuator, UnlockActuator, UnlockCommandExecutor, UnlockOutcome,
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_SIMULATED_LATENCY,
};
