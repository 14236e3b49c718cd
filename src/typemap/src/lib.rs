pub mod datatype_conversion;
pub mod guest_memory;
pub mod network_helpers;

pub use guest_memory::*;
pub use network_helpers::*;
