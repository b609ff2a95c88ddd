#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod workflow;

#[path = "../frame/mod.rs"]
pub mod frame;

#[path = "../learn/mod.rs"]
pub mod learn;

#[path = "../store/mod.rs"]
pub mod store;

pub use workflow::{
    DeployError, DeployReport, DeploySettings, PrepareSettings, SupervisedDeployment,
};
