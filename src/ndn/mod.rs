pub mod face;
pub mod keychain;
pub mod name;
pub mod packet;
pub mod tlv;
pub mod udp;

pub use face::{Face, FaceDriver, FaceEvent, FaceRequest};
pub use keychain::KeyChain;
pub use name::{Name, NameComponent};
pub use packet::{Data, Interest, SignatureType};
