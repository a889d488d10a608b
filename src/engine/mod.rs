pub mod closure;
pub mod exploration;
/// What to compute.
pub mod frame_coord;
/// Jobs and the closure interface.
pub mod job;
/// Execution-plan blueprints.
pub mod job_ticket;
/// Frame plans and their submission.
pub mod planning;
/// Ticket arena and its builder.
pub mod segment;
/// Frame grid and deadlines.
pub mod timings;
