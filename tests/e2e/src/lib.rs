//! End-to-end scenarios spanning process restarts and the HTTP/WebSocket surface —
//! things a single-crate unit test can't exercise.
