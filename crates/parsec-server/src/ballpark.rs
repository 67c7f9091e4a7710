//! Clock-drift validation.
//!
//! Clients stamp their certificates and vlob writes with their own clock;
//! the server only accepts timestamps inside the ballpark window. The
//! window is asymmetric: clients running late are tolerated a little more
//! than clients running early, since a late client merely re-submits while
//! an early client could mint certificates from the future.

use parsec_types::DateTime;

use crate::config::BallparkConfig;

/// Rejection carrying everything the client needs to resynchronize.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("timestamp {client_timestamp} out of ballpark (server at {server_timestamp})")]
pub struct TimestampOutOfBallpark {
    pub server_timestamp: DateTime,
    pub client_timestamp: DateTime,
    pub ballpark_client_early_offset: f64,
    pub ballpark_client_late_offset: f64,
}

/// Whether a client timestamp is acceptable at server time `now`.
pub fn timestamps_in_the_ballpark(
    client_timestamp: DateTime,
    now: DateTime,
    config: &BallparkConfig,
) -> bool {
    let late = (config.client_late_offset * 1_000_000.0) as i64;
    let early = (config.client_early_offset * 1_000_000.0) as i64;
    let low = now.add_micros(-late);
    let high = now.add_micros(early);
    low <= client_timestamp && client_timestamp <= high
}

/// Check a client timestamp, building the typed rejection on failure.
pub fn check_ballpark(
    client_timestamp: DateTime,
    now: DateTime,
    config: &BallparkConfig,
) -> Result<(), TimestampOutOfBallpark> {
    if timestamps_in_the_ballpark(client_timestamp, now, config) {
        Ok(())
    } else {
        Err(TimestampOutOfBallpark {
            server_timestamp: now,
            client_timestamp,
            ballpark_client_early_offset: config.client_early_offset,
            ballpark_client_late_offset: config.client_late_offset,
        })
    }
}
