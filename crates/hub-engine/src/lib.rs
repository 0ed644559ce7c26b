//! Live rule engine for the sensor hub
//!
//! This crate provides:
//! - [`RuleRunner`]: edge-triggered evaluation of one rule over live values
//! - [`Multiplexer`]: keyed fan-in of broker outlets with a control channel
//! - [`Dispatcher`]: carries out fired actions against devices and sequences
//! - [`LiveSession`]: a consumer-facing stream of readings and notifications
//! - [`Hub`]: the registries tying listeners, runners and sessions together

pub mod device;
pub mod dispatcher;
pub mod hub;
pub mod multiplexer;
pub mod runner;
pub mod sequence;
pub mod session;

pub use device::{DeviceClient, HttpDeviceClient};
pub use dispatcher::{DispatchError, DispatchResult, Dispatcher};
pub use hub::{Hub, HubError, HubOptions, HubResult, HubStores};
pub use multiplexer::{Multiplexer, MuxEvent};
pub use runner::{
    EdgeDetector, FiredAction, RuleRunner, RunnerCommand, RunnerError, RunnerHandle, RunnerResult,
};
pub use sequence::{HttpSequenceExecutor, SequenceExecutor};
pub use session::{ListenerLookup, LiveSession, SessionEvent, SessionHandle, SessionSource};
