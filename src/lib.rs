//! Dripgate - Hierarchical Leaky-Bucket Admission Control
//!
//! This crate implements a leaky-bucket admission-control primitive. Each
//! named scope owns a bucket that fills by one unit per recorded hit and
//! drains continuously at a configured rate; admission is denied once the
//! bucket is full. A namespaced scope (`"parent:child"`) stacks a broad
//! parent limit in front of a narrower child limit so one call site can
//! enforce both atomically, and a timeout latch can block all admission for
//! a fixed duration after a breach regardless of fill state.
//!
//! Persistence, notifications, and the time source are injected
//! capabilities: see [`store::Store`], [`notify::Notifier`], and
//! [`clock::Clock`].

pub mod clock;
pub mod config;
pub mod error;
pub mod notify;
pub mod ratelimit;
pub mod store;
