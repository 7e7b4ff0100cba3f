mod facts;
mod rollups;

pub use facts::PostgresFactRepo;
pub use rollups::PostgresRollupRepo;
