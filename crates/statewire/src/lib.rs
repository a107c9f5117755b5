//! Statewire command line tools
//!
//! Encodes JSON-lines snapshot streams into network envelopes, decodes them
//! back, and compares codecs on real data.

pub mod cli;
pub mod commands;
pub mod jsonl;
