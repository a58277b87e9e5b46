//! Integration test suite for conductor.
//!
//! These tests drive the classifier, decomposer, resolver, coordinator and
//! publisher together against an in-memory tracker and a scripted model.
//!
//! # Test Categories
//!
//! - `fan_out`: dependency resolution and parallel triggering
//! - `coordination`: run lifecycle and the duplicate guard
//! - `decomposition_flow`: a complex task from classification to parent close
//! - `publish`: push retries against real temporary git repositories
//!
//! # CI Compatibility
//!
//! No test talks to the network; the only external tool used is the `git`
//! executable for the push tests.

mod fixtures;

mod coordination;
mod decomposition_flow;
mod fan_out;
mod publish;
