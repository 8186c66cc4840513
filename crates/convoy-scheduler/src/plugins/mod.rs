//! Built-in scheduling plugins.

mod drf;
mod gang;
mod nodeorder;
mod predicates;
mod priority;
mod proportion;

pub use drf::DrfPlugin;
pub use gang::GangPlugin;
pub use nodeorder::NodeOrderPlugin;
pub use predicates::PredicatesPlugin;
pub use priority::PriorityPlugin;
pub use proportion::ProportionPlugin;

use crate::framework::Plugin;

/// Instantiate a plugin by its configured name
pub fn new_plugin(name: &str) -> Option<Box<dyn Plugin>> {
    match name {
        "priority" => Some(Box::new(PriorityPlugin)),
        "gang" => Some(Box::new(GangPlugin)),
        "drf" => Some(Box::new(DrfPlugin::default())),
        "proportion" => Some(Box::new(ProportionPlugin::default())),
        "predicates" => Some(Box::new(PredicatesPlugin)),
        "nodeorder" => Some(Box::new(NodeOrderPlugin)),
        _ => None,
    }
}

/// Whether a plugin name is registered
pub fn is_known(name: &str) -> bool {
    matches!(
        name,
        "priority" | "gang" | "drf" | "proportion" | "predicates" | "nodeorder"
    )
}
