#![allow(unused_imports)]

pub use std::collections::{HashMap, HashSet};
pub use std::sync::Arc;

pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};

pub use log::{debug, error, info, trace, warn};

pub use crate::utils::error::{ContextExt, Error, Result};
pub use crate::{client_bail, client_error, internal_bail, internal_error};
