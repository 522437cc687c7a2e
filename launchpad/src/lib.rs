//! launchpad - per-project package and environment manager.
//!
//! Provisions isolated, content-addressed package trees keyed by a manifest
//! fingerprint, activates them from a shell hook, and supervises declared
//! project services through OS-native unit descriptors.

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod output;
pub mod services;
