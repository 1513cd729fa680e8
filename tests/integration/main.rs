//! Integration tests: full scans and the scheduler loop against
//! in-memory market and completion providers.

mod mock_providers;
mod scan_flow;
mod scheduler_loop;
