//! # graphrun-cli
//!
//! Command line front end for graph documents: validate them, print their
//! execution plans and drive runs with the built-in [`demo`] handler kit.

pub mod commands;
pub mod demo;
