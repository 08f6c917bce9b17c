pub mod group;
pub mod hash;
pub mod pixel;
pub mod record;
pub mod resolve;
