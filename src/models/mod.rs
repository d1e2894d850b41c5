pub mod output;
pub mod request;
pub mod result;
pub mod value;
pub mod zone;

pub use output::*;
pub use request::*;
pub use result::*;
pub use value::*;
pub use zone::*;
