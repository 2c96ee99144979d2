pub mod codec;
pub mod store;

pub use codec::{decode, encode, Object, ObjectWriter, Payload};
pub use store::{LooseObject, ObjectStore};
