pub mod cache;
pub mod cli;
pub mod client;
pub mod grep;
pub mod logging;
pub mod request;
pub mod settings;
pub mod util;

/// Reserved out-of-range status code used to persist transport failures as
/// if they were responses. Origins never legitimately produce it, so a cached
/// 999 entry can always be recognized and replayed (or bypassed) later.
pub const ERROR_STATUS: u16 = 999;
