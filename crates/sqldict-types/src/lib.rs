pub mod op;
pub mod path;
pub mod settings;
pub mod value;

pub use op::{DictOpSettings, IterateFlags};
pub use path::{PATH_PRIVATE, PATH_SHARED, is_private_path};
pub use settings::{DictMap, DictSettings, SqlField};
pub use value::{RawValue, SqlParam, SqlValueType, bytes_to_hex, hex_to_bytes};
