pub mod character;
pub mod script;
