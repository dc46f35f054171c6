pub mod client;
pub mod parse;
pub mod prompts;

pub use client::{
    invoke_with_retry, is_rate_limited, ChatClient, RetryPolicy, Sleeper, TokioSleeper,
};
pub use parse::{parse_verifier_response, VerifierResponse};
