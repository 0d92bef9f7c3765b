//! Prompt module for LLM-based operations.
//!
//! This module provides prompt templates for the review pipeline.

pub mod review;

pub use review::*;
