pub mod connection;
pub mod constants;
pub mod decoder;
pub mod power;
pub mod radio;
pub mod scanner;
pub mod session;
pub mod types;
