pub mod device;
pub mod digest;
pub mod error;
pub mod normalizer;
pub mod raw;
pub mod search;
pub mod stream;
pub mod xml;

pub use device::{DeviceInfo, DeviceStatus, DeviceUser, UserPage, UserSearchRequest};
pub use digest::{DigestChallenge, generate_cnonce};
pub use error::{ProtocolError, Result};
pub use normalizer::{DirectionRule, EventNormalizer};
pub use raw::RawDeviceEvent;
pub use search::{SearchPage, SearchRequest, TimeWindow};
pub use stream::StreamDecoder;
pub use xml::XmlElement;
