pub mod category;
pub mod competition;
pub mod device;
pub mod race;
pub mod ranking;
pub mod record;
pub mod sample;
pub mod team;

pub use category::Category;
pub use competition::Competition;
pub use device::Device;
pub use race::Race;
pub use ranking::{FinishStatus, Ranking};
pub use record::Record;
pub use sample::Sample;
pub use team::Team;
