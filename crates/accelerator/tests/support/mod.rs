pub mod fake_engine;
pub mod mock_state;
