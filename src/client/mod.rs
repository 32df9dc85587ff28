pub mod session;
pub mod transport;

pub use session::{Credentials, Scope, Session, WorkspaceId};
