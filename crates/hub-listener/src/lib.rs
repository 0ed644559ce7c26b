//! Sensor listeners
//!
//! A [`Listener`] polls one device, keeps a short window of its most recent
//! values and republishes that window through its own broker after every
//! poll. Runners and live sessions subscribe to that broker.

mod listener;
mod source;

pub use listener::{
    Listener, ListenerError, ListenerOptions, ListenerResult, OnNewValue,
    DEFAULT_MAX_BACKOFF_MULTIPLIER,
};
pub use source::{FetchError, HttpValueSource, ValueSource, DEFAULT_SENSOR_TIMEOUT};
