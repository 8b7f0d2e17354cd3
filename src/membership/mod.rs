mod peer;

pub use peer::*;
