//! End-to-end HTTP coverage: requests through the axum router, envelope and
//! error shapes as a client would see them.
