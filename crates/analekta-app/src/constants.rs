/// Number of documents copied into each `batch-N/` prefix by the organizer.
pub const DEFAULT_BATCH_SIZE: usize = 150;

/// Upper bound on job records examined in a single recovery pass.
pub const RECOVERY_SCAN_LIMIT: usize = 1000;
