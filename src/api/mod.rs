//! HTTP adapter for the assignment engine.
//!
//! Routes:
//! - `POST /api/tasks/{task_id}/assign`
//! - `POST /api/tasks/{task_id}/unassign`
//! - `GET  /api/tasks/{task_id}/assignments?limit=&cursor=`
//! - `GET  /api/health`

mod server;

pub use server::{REPLAY_HEADER, ServerHandle, build_router, start_server};
