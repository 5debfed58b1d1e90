//! Test helpers shared by unit tests, integration tests and benches

pub mod car_fixture;
pub mod mock_session;

pub use car_fixture::CarBuilder;
pub use mock_session::MockSession;
