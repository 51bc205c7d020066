pub mod race;
pub mod ranking;
pub mod record;
