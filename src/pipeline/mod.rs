//! The message processing pipeline.
//!
//! Every delivered message flows through:
//! 1. host-registered side-effect processors (isolated failures)
//! 2. [`resolver`]: key extraction and rule lookup
//! 3. the decoration pipeline (`crate::rest::decorators`)
//! 4. outbound dispatch (`crate::rest::client`)
//!
//! One consumer, one message at a time; each message yields exactly one
//! published [`processor::ProcessResult`].

pub mod processor;
pub mod resolver;
pub mod worker;
