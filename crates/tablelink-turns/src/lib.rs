//! Tablelink — combat turns bounded context.
//!
//! Responsible for the initiative order and whose turn it is, learning
//! initiative from the tabletop's chat log, and telling observers and the
//! chat side when the active combatant changes.

pub mod application;
pub mod domain;
