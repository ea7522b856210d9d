//! RTSP request surface and the SAT>IP transport parameter grammar.
//!
//! The RTSP dispatcher (connection handling, response generation, the
//! full method grammar) lives outside this crate. What crosses the
//! boundary is a parsed [`RtspRequest`] — method, URI, headers — and the
//! SAT>IP transport parameters carried in the URI query string, e.g.:
//!
//! ```text
//! SETUP rtsp://10.0.0.2/?src=1&freq=11836&pol=v&msys=dvbs2&sr=27500&fec=34&pids=0,17,100 RTSP/1.0
//! ```
//!
//! [`params`] parses that query subset; unknown enum tokens are coerced
//! (never rejected) per the SAT>IP server behavior.

pub mod params;
pub mod request;

pub use request::RtspRequest;
