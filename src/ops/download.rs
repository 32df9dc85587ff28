use crate::prelude::*;

use indicatif::ProgressBar;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::base::entity::EntityId;
use crate::repository::EntityApi;

#[derive(Debug, Default, PartialEq)]
pub struct DownloadReport {
    pub files: Vec<PathBuf>,
    /// Requested class names the workspace does not know.
    pub unknown_types: Vec<String>,
}

/// Writes every entity of the requested types as
/// `<destination>/<class_name>/<id>.json`, or each of its revisions as
/// `<id>_rev<n>.json`. Records are written as the server listed them.
pub async fn download_entities(
    api: &dyn EntityApi,
    destination: &Path,
    class_names: &[String],
    include_revisions: bool,
    progress: &ProgressBar,
) -> Result<DownloadReport> {
    let types = api.entity_types().await?;
    let mut report = DownloadReport {
        unknown_types: class_names
            .iter()
            .filter(|name| !types.iter().any(|t| &t.class_name == *name))
            .cloned()
            .collect(),
        ..Default::default()
    };
    for name in &report.unknown_types {
        warn!("Entity type '{name}' does not exist in {}", api.label());
    }

    for entity_type in types.iter().filter(|t| class_names.contains(&t.class_name)) {
        let folder = destination.join(&entity_type.class_name);
        tokio::fs::create_dir_all(&folder)
            .await
            .with_context(|| format!("creating {}", folder.display()))?;

        let records = api.entity_records(entity_type.id).await?;
        progress.inc_length(records.len() as u64);
        for record in records {
            let id = record
                .get("id")
                .and_then(Value::as_i64)
                .map(EntityId)
                .ok_or_else(|| {
                    internal_error!("an entity of type {} was listed without an id", entity_type.class_name)
                })?;
            let documents: Vec<(String, Value)> = if include_revisions {
                api.entity_revisions(id)
                    .await?
                    .into_iter()
                    .enumerate()
                    .map(|(n, revision)| (format!("{id}_rev{n}.json"), revision))
                    .collect()
            } else {
                vec![(format!("{id}.json"), record)]
            };
            for (filename, document) in documents {
                let path = folder.join(filename);
                tokio::fs::write(&path, serde_json::to_vec_pretty(&document)?)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                report.files.push(path);
            }
            progress.inc(1);
        }
    }
    info!(
        "Downloaded {} files from {} to {}",
        report.files.len(),
        api.label(),
        destination.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_utils::InMemoryWorkspace;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn workspace() -> InMemoryWorkspace {
        let ws = InMemoryWorkspace::new(&[(1, "Project"), (2, "CPT File")]);
        ws.add_root(1, "Projects", 1);
        ws.add_child(1, 40, "cpt-1", 2, json!({"depth": 3}));
        ws.add_child(1, 41, "cpt-2", 2, json!({}));
        ws.set_revisions(40, vec![json!({"rev": 0}), json!({"rev": 1})]);
        ws
    }

    fn relative(report: &DownloadReport, root: &Path) -> Vec<String> {
        report
            .files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[tokio::test]
    async fn writes_one_file_per_entity() {
        let dir = tempfile::tempdir().unwrap();
        let report = download_entities(
            &workspace(),
            dir.path(),
            &["CPT File".to_string(), "Borehole".to_string()],
            false,
            &ProgressBar::hidden(),
        )
        .await
        .unwrap();

        assert_eq!(relative(&report, dir.path()), vec!["CPT File/40.json", "CPT File/41.json"]);
        assert_eq!(report.unknown_types, vec!["Borehole"]);
        let written: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("CPT File/40.json")).unwrap()).unwrap();
        assert_eq!(written["name"], "cpt-1");
        assert_eq!(written["properties"]["depth"], 3);
    }

    #[tokio::test]
    async fn records_are_written_as_listed() {
        let ws = workspace();
        ws.set_record_fields(40, json!({"created_at": "2024-01-01", "last_saved_by": {"id": 9}}));
        let dir = tempfile::tempdir().unwrap();
        download_entities(
            &ws,
            dir.path(),
            &["CPT File".to_string()],
            false,
            &ProgressBar::hidden(),
        )
        .await
        .unwrap();

        let written: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("CPT File/40.json")).unwrap()).unwrap();
        assert_eq!(
            written,
            json!({
                "id": 40,
                "name": "cpt-1",
                "entity_type": 2,
                "properties": {"depth": 3},
                "created_at": "2024-01-01",
                "last_saved_by": {"id": 9}
            })
        );
    }

    #[tokio::test]
    async fn revisions_are_numbered_in_listing_order() {
        let dir = tempfile::tempdir().unwrap();
        let report = download_entities(
            &workspace(),
            dir.path(),
            &["CPT File".to_string()],
            true,
            &ProgressBar::hidden(),
        )
        .await
        .unwrap();
        assert_eq!(
            relative(&report, dir.path()),
            vec!["CPT File/40_rev0.json", "CPT File/40_rev1.json"]
        );
        let second: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("CPT File/40_rev1.json")).unwrap()).unwrap();
        assert_eq!(second, json!({"rev": 1}));
    }
}
