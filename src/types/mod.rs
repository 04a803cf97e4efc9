//! Value types shared by commands, events and device state.

mod message_type;
mod position;
mod position_state;

pub use message_type::MessageType;
pub use position::Position;
pub use position_state::PositionState;
