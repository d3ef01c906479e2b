//! Domain layer: the transaction context model, its builder, the result
//! type, and the ports to the collaborators the executor drives.

pub mod builder;
pub mod context;
pub mod ids;
pub mod ports;
pub mod result;
