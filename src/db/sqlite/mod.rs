mod facts;
mod rollups;

pub use facts::SqliteFactRepo;
pub use rollups::SqliteRollupRepo;
