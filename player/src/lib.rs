//! Android emulator automation: scripted taps, swipes, and template matching
//! over ADB.
//!
//! A game file declares named tasks; each task is a list of steps (wait,
//! click, swipe, wait for a template, find-and-click, screenshot,
//! notification, stop). The crate is split the usual way:
//!
//! - **[`core`]**: Pure logic (template scoring, execution state, program
//!   lints, name sanitizing). No I/O.
//! - **[`io`]**: Side effects (adb transport, config and game files, template
//!   store, OCR subprocess).
//!
//! [`interpreter`] runs one task against a [`io::device::Device`];
//! [`looping`] repeats it. [`matcher`] wraps scoring for file-backed
//! templates and polling. [`operator`] serves the terminal during a run.

pub mod core;
pub mod exit_codes;
pub mod interpreter;
pub mod io;
pub mod logging;
pub mod looping;
pub mod matcher;
pub mod notify;
pub mod operator;
pub mod program;
pub mod stop;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
