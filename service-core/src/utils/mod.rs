pub mod signature;

pub use signature::{secrets_match, sign_payload, verify_payload};
