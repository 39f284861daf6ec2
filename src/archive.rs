//! Archive Packager - one tar for a whole execution
//!
//! Entry order: workflow, pipelines, applications. Entry names are a
//! compatibility contract for unpacking tools:
//! `<name>.yml`, `<name>.pip.yml`, `<name>.app.yml`.

use std::io::Write;
use tracing::debug;

use crate::documents::{parse_result, to_yaml};
use crate::error::{ArtifactRef, EngineError};
use crate::execute::ExecutionResult;

pub const WORKFLOW_SUFFIX: &str = ".yml";
pub const PIPELINE_SUFFIX: &str = ".pip.yml";
pub const APPLICATION_SUFFIX: &str = ".app.yml";
pub const ENTRY_MODE: u32 = 0o644;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Parses and re-serializes every document. Fails before any byte is written.
pub fn archive_entries(template_id: &str, result: &ExecutionResult) -> Result<Vec<ArchiveEntry>, EngineError> {
    let parsed = parse_result(template_id, result)?;
    let mut entries = Vec::with_capacity(result.artifact_count());

    let wf = &parsed.workflow;
    entries.push(ArchiveEntry {
        name: format!("{}{}", wf.name, WORKFLOW_SUFFIX),
        data: to_yaml(ArtifactRef::Workflow, &wf.name, wf)?.into_bytes(),
    });
    for (i, pip) in parsed.pipelines.iter().enumerate() {
        entries.push(ArchiveEntry {
            name: format!("{}{}", pip.name, PIPELINE_SUFFIX),
            data: to_yaml(ArtifactRef::Pipeline(i), &pip.name, pip)?.into_bytes(),
        });
    }
    for (i, app) in parsed.applications.iter().enumerate() {
        entries.push(ArchiveEntry {
            name: format!("{}{}", app.name, APPLICATION_SUFFIX),
            data: to_yaml(ArtifactRef::Application(i), &app.name, app)?.into_bytes(),
        });
    }
    Ok(entries)
}

/// Writes entries as a tar archive and hands the sink back.
///
/// The archive is assembled in memory first; the sink only ever sees a
/// complete archive. Names past the 100-byte header field get a GNU
/// long-name record.
pub fn write_archive<W: Write>(entries: &[ArchiveEntry], mut sink: W) -> Result<W, EngineError> {
    let mut builder = tar::Builder::new(Vec::new());
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(ENTRY_MODE);
        header.set_size(entry.data.len() as u64);
        header.set_mtime(0);
        builder.append_data(&mut header, &entry.name, entry.data.as_slice())?;
        debug!(entry = %entry.name, size = entry.data.len(), "archived entry");
    }
    let bytes = builder.into_inner()?;
    sink.write_all(&bytes)?;
    Ok(sink)
}

pub fn package<W: Write>(template_id: &str, result: &ExecutionResult, sink: W) -> Result<W, EngineError> {
    let entries = archive_entries(template_id, result)?;
    write_archive(&entries, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn result() -> ExecutionResult {
        ExecutionResult {
            workflow: "name: api\nworkflow: {}\n".into(),
            pipelines: vec!["name: build\n".into(), "name: deploy\n".into()],
            applications: vec!["name: api-app\n".into()],
        }
    }

    #[test]
    fn test_entries_in_order_with_exact_sizes() {
        let bytes = package("tpl", &result(), Vec::new()).unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());

        let mut seen = vec![];
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let declared = entry.header().size().unwrap();
            assert_eq!(entry.header().mode().unwrap(), 0o644);
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            assert_eq!(declared, content.len() as u64);
            seen.push(path);
        }
        assert_eq!(seen, vec!["api.yml", "build.pip.yml", "deploy.pip.yml", "api-app.app.yml"]);
    }

    #[test]
    fn test_parse_failure_writes_nothing() {
        let mut bad = result();
        bad.applications.push("- not a document".into());
        let mut sink = Vec::new();
        let err = package("tpl", &bad, &mut sink).unwrap_err();
        assert!(matches!(err, EngineError::DocumentParse { artifact: ArtifactRef::Application(1), .. }));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_long_names_survive() {
        let long = "p".repeat(100);
        let res = ExecutionResult {
            workflow: "name: wf\n".into(),
            pipelines: vec![format!("name: {}\n", long)],
            applications: vec![],
        };
        let bytes = package("tpl", &res, Vec::new()).unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["wf.yml".to_string(), format!("{}.pip.yml", long)]);
    }

    #[test]
    fn test_unwritable_name_leaves_sink_empty() {
        let res = ExecutionResult {
            workflow: "name: wf\n".into(),
            pipelines: vec!["name: /etc/passwd\n".into()],
            applications: vec![],
        };
        let mut sink = Vec::new();
        let err = package("tpl", &res, &mut sink).unwrap_err();
        assert!(matches!(err, EngineError::Archive(_)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_deterministic_bytes() {
        let a = package("tpl", &result(), Vec::new()).unwrap();
        let b = package("tpl", &result(), Vec::new()).unwrap();
        assert_eq!(a, b);
    }
}
