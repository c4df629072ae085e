//! Concurrency utilities for coordinating the consumer driver.
//!
//! The driver runs two logical input streams (control and data channel) whose
//! effects on the consumer phase must be applied in one serialized sequence.
//! The utilities here only cover signaling around that single loop; the loop
//! itself never shares the phase with another task.

pub mod shutdown;
