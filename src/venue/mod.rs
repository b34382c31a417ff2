// =============================================================================
// Venue — info endpoint, signer adapter, bridge, tick rules
// =============================================================================

pub mod bridge;
pub mod error;
pub mod info;
pub mod rounding;
pub mod signer;

pub use bridge::{Balance, OpenOrder, OrderAck, VenueBridge, VenuePosition};
pub use error::{VenueError, VenueResult};
pub use info::InfoClient;
pub use signer::{Signer, SubprocessSigner};
