mod ring;
mod url;

pub use ring::Ring;
pub use url::{host_of, normalize_domain};
