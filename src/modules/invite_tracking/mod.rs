pub mod commands;
pub mod events;
pub mod reconciler;
pub mod router;
pub mod snapshot;
pub mod tracking;

use crate::modules::{Module, ModuleDefinition};

pub const DEFINITION: ModuleDefinition = ModuleDefinition {
    id: "invite_tracking",
    name: "Invite Tracking",
    description: "Attributes new members to the invite they used and announces it.",
};

pub fn module() -> Module {
    Module {
        definition: DEFINITION,
        commands: commands::commands(),
        event_handlers: vec![events::handler],
    }
}
