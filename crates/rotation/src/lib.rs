//! Account rotation: which account serves the next request, and when to
//! move off the current one.

pub mod controller;
pub mod error;

pub use {
    controller::{RotationController, SwitchOutcome},
    error::{Error, Result},
};
