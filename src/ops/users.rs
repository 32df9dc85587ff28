use crate::prelude::*;

use std::io::Read;
use std::path::Path;

use crate::client::{Scope, Session};

pub const REQUIRED_COLUMNS: [&str; 3] = ["first_name", "last_name", "email"];

#[derive(Debug, Deserialize)]
struct UserRow {
    first_name: String,
    last_name: String,
    email: String,
    #[serde(default)]
    job_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub job_title: String,
    pub is_dev: bool,
    pub is_env_admin: bool,
    pub is_external: bool,
    pub send_activation_email: bool,
}

impl NewUser {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl From<UserRow> for NewUser {
    fn from(row: UserRow) -> Self {
        Self {
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            job_title: row.job_title.unwrap_or_default(),
            is_dev: true,
            is_env_admin: false,
            is_external: false,
            send_activation_email: true,
        }
    }
}

/// Users read from a CSV file, with the rows that could not be read.
#[derive(Debug, Default)]
pub struct UserSheet {
    pub users: Vec<NewUser>,
    /// File line number and reason.
    pub rejected: Vec<(u64, String)>,
}

pub fn read_users_csv(path: &Path) -> Result<UserSheet> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_users(file).with_context(|| format!("reading users from {}", path.display()))
}

/// A missing column fails the whole file; a bad row is only rejected.
pub fn parse_users<R: Read>(reader: R) -> Result<UserSheet> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            client_bail!("CSV does not have a column with label \"{column}\"");
        }
    }
    let mut sheet = UserSheet::default();
    let mut record = csv::StringRecord::new();
    loop {
        let line = reader.position().line();
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => match record.deserialize::<UserRow>(Some(&headers)) {
                Ok(row) => sheet.users.push(NewUser::from(row)),
                Err(e) => {
                    warn!("Skipping line {line} of the user file: {e}");
                    sheet.rejected.push((line, e.to_string()));
                }
            },
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!("Skipping line {line} of the user file: {e}");
                sheet.rejected.push((line, e.to_string()));
            }
        }
    }
    Ok(sheet)
}

#[derive(Debug, Default)]
pub struct UserImportReport {
    pub added: Vec<String>,
    /// Display name and reason.
    pub failed: Vec<(String, String)>,
}

/// Adds each user in turn; a failure is recorded and the rest still go in.
pub async fn add_users(session: &Session, users: &[NewUser]) -> Result<UserImportReport> {
    let mut report = UserImportReport::default();
    for user in users {
        let name = user.display_name();
        match session
            .post("/users/", &serde_json::to_value(user)?, Scope::Tenant)
            .await
        {
            Ok(_) => {
                info!("Added user {name}");
                report.added.push(name);
            }
            Err(e) => {
                warn!("Failed to add user {name}: {e}");
                report.failed.push((name, e.to_string()));
            }
        }
    }
    Ok(report)
}
