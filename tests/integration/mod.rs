//! Integration tests for the plan consensus engine
//!
//! Each module drives the public library surface end to end:
//! - `scenario_test` - the three-analyzer consensus-to-approval flow
//! - `lifecycle_test` - autonomous plan mutations, approvals, rollback
//! - `cascade_test` - phase graph execution and cascading reruns
//! - `recovery_test` - checkpoint resume and run history

mod common;

mod cascade_test;
mod lifecycle_test;
mod recovery_test;
mod scenario_test;
