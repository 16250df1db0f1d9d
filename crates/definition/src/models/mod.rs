mod definition;
mod value;

pub use self::definition::Definition;
pub use self::value::Value;
