pub mod domain;
pub use domain::*;

pub mod error;
pub use error::*;

pub mod network;
pub use network::*;

pub mod node;
pub use node::*;

pub mod util;
pub use util::*;
