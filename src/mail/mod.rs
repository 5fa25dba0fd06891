pub mod decoders;
pub mod filter;
pub mod session;
