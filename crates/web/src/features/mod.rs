pub mod competitions;
pub mod races;
pub mod rankings;
pub mod records;
