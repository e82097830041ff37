//! Test suites for the pipechat broker.

mod relay_behaviour;
pub(crate) mod support;
