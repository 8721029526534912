//! Command tables of the supported protocol variants

mod daly;
mod jk02;
mod pi18;
mod pi30;
mod text;

use crate::error::Result;
use crate::protocol::{ProtocolDefinition, ProtocolId};

/// Build the definition of `id`; fails only on a malformed table
pub fn definition(id: ProtocolId) -> Result<ProtocolDefinition> {
    match id {
        ProtocolId::Pi30 => pi30::definition(),
        ProtocolId::Pi18 => pi18::definition(),
        ProtocolId::Jk02 => jk02::definition(),
        ProtocolId::Daly => daly::definition(),
        ProtocolId::Text => text::definition(),
    }
}
