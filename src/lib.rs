//! Minibatch packing for sequence training.
//!
//! Variable-length utterances are packed into fixed-shape
//! minibatches of parallel sequences, either whole (with
//! gap-packing), as truncated BPTT windows, frame by frame, or
//! one utterance at a time for writing outputs. See
//! [`data::reader::MinibatchReader`].

#![recursion_limit = "256"]

pub mod application;
pub mod cli;
pub mod data;
pub mod domain;
pub mod infra;
pub mod ml;
