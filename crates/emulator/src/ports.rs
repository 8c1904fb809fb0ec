//! Ephemeral Port Discovery
//!
//! Asks the OS for a free TCP port by binding to port 0 and reading the
//! assignment back. The port is only guaranteed free at the moment of the
//! call; callers use it promptly and treat a later collision as a
//! retryable spawn failure.

use std::io;
use std::net::TcpListener;

/// Allocate one free ephemeral TCP port.
pub fn allocate() -> io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_nonzero_port() {
        let port = allocate().unwrap();
        assert_ne!(port, 0);
    }

    #[test]
    fn allocated_port_is_immediately_bindable() {
        let port = allocate().unwrap();
        TcpListener::bind(("127.0.0.1", port)).unwrap();
    }
}
