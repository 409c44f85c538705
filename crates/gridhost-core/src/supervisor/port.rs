//! Free port discovery by random probing on the loopback.

use std::net::{Ipv4Addr, TcpListener};
use std::ops::Range;

use rand::Rng;
use tracing::debug;

use super::LaunchError;

pub const PORT_RANGE: Range<u16> = 5001..65535;
pub const MAX_PROBES: usize = 1024;

/// `true` if a listener can currently bind `port` on 127.0.0.1.
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

pub fn find_free_port() -> Result<u16, LaunchError> {
    let mut rng = rand::thread_rng();
    for _ in 0..MAX_PROBES {
        let port = rng.gen_range(PORT_RANGE);
        if is_port_free(port) {
            return Ok(port);
        }
        debug!(port, "port in use, probing another");
    }
    Err(LaunchError::NoFreePort)
}
