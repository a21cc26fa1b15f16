//! The writer-registration record (§3, §4.7). A token is embedded directly
//! in its owning channel rather than separately refcounted — at most one
//! slot per channel, so there's nothing to share.

#[derive(Default)]
pub struct Token {
    /// Index into `port.writers` while `submitted`; meaningless otherwise.
    pub idx: usize,
    pub submitted: bool,
}

impl Token {
    pub fn new() -> Token {
        Token {
            idx: 0,
            submitted: false,
        }
    }
}
