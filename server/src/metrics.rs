//! Server metrics.

use metriken::{metric, Counter, Gauge};

#[metric(
    name = "connections_accepted",
    description = "Total number of connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_released",
    description = "Connections dropped before completing login"
)]
pub static CONNECTIONS_RELEASED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Connections currently holding a slot"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(
    name = "sessions_joined",
    description = "Sessions handed to the join queue after login"
)]
pub static SESSIONS_JOINED: Counter = Counter::new();

#[metric(
    name = "protocol_errors",
    description = "Malformed handshake or login packets"
)]
pub static PROTOCOL_ERRORS: Counter = Counter::new();
