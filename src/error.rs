use thiserror::Error;

use crate::port::identifier::{PortKind, PortUuid};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("cannot connect {src:?} output to {dest:?} input")]
    KindMismatch { src: PortKind, dest: PortKind },
    #[error("connecting to {0} would create a cycle")]
    Cycle(PortUuid),
    #[error("port {0} not found")]
    PortLookup(PortUuid),
    #[error("bar numbers start at 1, got {0}")]
    InvalidBar(i32),
    #[error("malformed position string {0:?}")]
    PositionParse(String),
}
