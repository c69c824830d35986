//! UV-Customizer
//!
//! UV-region-aware texture compositing core for 3D product customizers.
//! Resolves the customizable material region of a loaded model, composites
//! user image layers into a square canonical atlas with aspect-distortion
//! compensation, drives an interactive screen-space transform widget, and
//! exports print-accurate crops.

pub mod config;
pub mod controller;
pub mod domain;
pub mod engine;
pub mod providers;
pub mod resolver;
pub mod session;
