//! Liveness probing for pooled connections
//!
//! A probe runs the driver's trivial round-trip query and reports the
//! latency. The pool probes a candidate before handing it out and again
//! before putting a returned connection back on the shelf.

mod ping;


pub use ping::{PingError, PingResult, ping_database, ping_with_timeout};
