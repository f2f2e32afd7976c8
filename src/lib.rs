//! Protocol-level emulation of a DualShock 4 class controller.
//!
//! The crate is split along the data path of a real pad:
//!
//! 1. [`report`] - bit-exact wire structures exchanged with the host
//! 2. [`tracker`] - double-buffered input state, touch and motion sub-trackers
//! 3. [`auth`] - paged challenge/response handshake with RSA-PSS signing
//! 4. [`sequencer`] - timed presses, cancellable chains and tweens
//! 5. [`control`] / [`transport`] - glue for an external USB driver
//!
//! # Architecture
//!
//! ```text
//! Automation ──► Sequencer ──► StateTracker ──► ReportPump ──► IN endpoint
//!                                  ▲
//!           OUT endpoint ──────────┘ (feedback)
//!
//! Control EP0 ──► ControlDispatcher ──► AuthEngine / FeatureConfiguration
//! ```

pub mod auth;
pub mod clock;
pub mod config;
pub mod control;
pub mod report;
pub mod sequencer;
pub mod tracker;
pub mod transport;

pub use auth::{AuthEngine, AuthError, AuthStatusCode, ChallengeSigner, KeyError, KeyMaterial};
pub use clock::{Clock, MonotonicClock};
pub use config::{ConfigError, EmulatorConfig};
pub use control::{ControlDispatcher, ControlError};
pub use report::{
    Button, CodecError, ControllerFeature, DPadPosition, FeatureConfiguration, FeedbackReport,
    InputReport, ReportType, TouchFrame, TouchPoint,
};
pub use sequencer::{
    Animation, Channel, Easing, Motion, Pose, Sequencer, SequencerError, SequencerSettings, StickSide,
    StickUnit, Target, TriggerSide,
};
pub use tracker::{ImuMode, PoseUpdate, StateTracker, TrackerError, TrackerState};
pub use transport::{ReportPump, TransferStatus, TransportError};
