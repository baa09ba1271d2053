pub mod beacon;
pub mod cursor;
pub mod frame;
pub mod record;
