//! End-to-end tests: coordinator commit, dispatch, delivery and idempotent consumption.

mod dispatch;
mod consume;
mod threaded;
