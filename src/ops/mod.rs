pub mod download;
pub mod mirror;
pub mod prompt;
pub mod stash;
pub mod users;

#[cfg(test)]
pub(crate) mod test_utils;
