//! Lets wiremock tests skip in sandboxes that forbid binding localhost.
//!
//! Set `HARVESTER_REQUIRE_SOCKET_TESTS=1` in CI to turn a skip into a failure.

use std::net::TcpListener;
use std::panic::Location;

use wiremock::MockServer;

const REQUIRE_ENV: &str = "HARVESTER_REQUIRE_SOCKET_TESTS";

fn sockets_required() -> bool {
    std::env::var(REQUIRE_ENV)
        .is_ok_and(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Starts a mock server, or returns `None` (after saying so on stderr) when
/// no local port can be bound.
#[track_caller]
pub fn start_mock_server_or_skip() -> impl Future<Output = Option<MockServer>> {
    let caller = Location::caller();
    async move {
        if TcpListener::bind("127.0.0.1:0").is_ok() {
            return Some(MockServer::start().await);
        }
        assert!(
            !sockets_required(),
            "{caller}: cannot bind a localhost socket and {REQUIRE_ENV} is set"
        );
        eprintln!("{caller}: cannot bind a localhost socket, skipping mock-server test");
        None
    }
}
