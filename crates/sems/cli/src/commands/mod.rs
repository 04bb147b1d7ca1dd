//! Command implementations for the sems CLI

mod card;
mod script;

pub(crate) use card::*;
pub(crate) use script::*;
