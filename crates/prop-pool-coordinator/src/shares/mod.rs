pub mod proof;
pub mod types;
pub mod validator;

pub use proof::{ProofFunction, Sha256Proof};
pub use types::{RoundTemplate, ShareClass, ShareOutcome, ShareSubmission};
pub use validator::ShareValidator;
