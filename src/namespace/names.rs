//! Random name and session token generation

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of generated directory and file names
pub const NAME_LEN: usize = 64;

/// Length of a file session token
pub const SESSION_TOKEN_LEN: usize = 12;

/// Generate a random alphanumeric name of `len` characters
pub fn random_name<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a fresh session token
///
/// Tokens are the tail of a v4 UUID; a read whose token differs from the
/// file's current one was issued against an older version of the file.
pub fn session_token() -> String {
    let full = uuid::Uuid::new_v4().simple().to_string();
    full[full.len() - SESSION_TOKEN_LEN..].to_string()
}
