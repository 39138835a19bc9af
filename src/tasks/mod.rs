/**
 * Analysis task lifecycle
 *
 * `registry` starts tasks and owns the records, `poller` advances them one
 * tick at a time, `store` is the shared record map and change feed.
 */
mod model;
mod poller;
mod registry;
mod store;

pub use model::{status_label_cn, TaskEvent, TaskRecord, TaskStatus};
pub use poller::{apply_failure, apply_report, Applied, PollHandle, PollerConfig, TaskPoller};
pub use registry::TaskRegistry;
