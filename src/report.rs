//! Statistics files.
//!
//! The statistics export and the disabled-options list share one format: a
//! `;`-separated CSV with a header row and double-quoted text fields
//! (embedded quotes doubled). The export can be edited and fed back as the
//! disabled-options list of a later run.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::FuzzError;
use crate::feature::{CompositeKey, FragmentKey, HoleKind, Node, SyntaxFeature};
use crate::feedback::{ExecutionRecord, FeedbackStats};

pub const STATISTICS_HEADER: &str = "Type;Key;Name;Value;Success;Count;Example";

const NODE_TYPE: &str = "NODE";
const COMPOSITE_TYPE: &str = "COMPOSITE";

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Split one `;`-separated row, honouring double quotes.
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// `Type;Key;Name` columns of a feature.
fn feature_columns(feature: &SyntaxFeature) -> (String, String, String) {
    match feature {
        SyntaxFeature::Node(node) => (NODE_TYPE.to_string(), String::new(), node.as_str().to_string()),
        SyntaxFeature::Composite(key) => {
            (COMPOSITE_TYPE.to_string(), key.tag().to_string(), key.to_json())
        }
        SyntaxFeature::Fragment(key) => (
            key.hole.as_str().to_string(),
            key.key.clone(),
            key.template.clone(),
        ),
    }
}

// ── Export ─────────────────────────────────────────────────────────────────

/// Write one row per observed feature.
pub fn write_statistics(path: &Path, stats: &FeedbackStats) -> Result<(), FuzzError> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(out, "{STATISTICS_HEADER}")?;
    for entry in stats.entries() {
        let (ty, key, name) = feature_columns(&entry.feature);
        writeln!(
            out,
            "{ty};{key};{};{};{};{};{}",
            quote(&name),
            entry.enabled,
            entry.tally.successes,
            entry.tally.attempts,
            quote(entry.example.as_deref().unwrap_or_default()),
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Write `<session>Options.txt` listing the features of `record`.
pub fn write_feature_dump(
    dir: &Path,
    session: &str,
    record: &ExecutionRecord,
) -> Result<PathBuf, FuzzError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{session}Options.txt"));
    let mut out = std::io::BufWriter::new(std::fs::File::create(&path)?);
    for (feature, count) in &record.features {
        writeln!(out, "{feature} : {count}")?;
    }
    out.flush()?;
    Ok(path)
}

// ── Disabled options ───────────────────────────────────────────────────────

fn parse_disabled_row(fields: &[String]) -> Result<SyntaxFeature, FuzzError> {
    let [ty, key, name, ..] = fields else {
        return Err(FuzzError::MalformedConfigRow(format!(
            "expected at least 3 fields, got {}",
            fields.len()
        )));
    };
    match ty.trim().to_uppercase().as_str() {
        NODE_TYPE => Ok(SyntaxFeature::Node(Node::from_str(name)?)),
        COMPOSITE_TYPE => Ok(SyntaxFeature::Composite(CompositeKey::from_json(name)?)),
        other => {
            let hole = HoleKind::from_str(other)?;
            Ok(SyntaxFeature::Fragment(FragmentKey::new(
                hole,
                key.trim(),
                name.trim(),
            )))
        }
    }
}

/// Disable every feature listed in `reader`.
///
/// A leading `Type;...` header row is skipped. Rows that cannot be parsed are
/// logged and skipped. Features that already have a flag keep it. Returns the
/// number of rows applied.
pub fn load_disabled_options<R: BufRead>(
    reader: R,
    stats: &mut FeedbackStats,
) -> Result<usize, FuzzError> {
    let mut applied = 0;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_fields(&line);
        if lineno == 0 && fields[0].trim().eq_ignore_ascii_case("type") {
            continue;
        }
        match parse_disabled_row(&fields) {
            Ok(feature) => {
                stats.set_option_if_absent(feature, false);
                applied += 1;
            }
            Err(e) => {
                tracing::warn!(line = lineno + 1, error = %e, "skipping disabled-options row");
            }
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::FeedbackSettings;

    fn stats() -> FeedbackStats {
        FeedbackStats::new(FeedbackSettings::default())
    }

    #[test]
    fn test_split_fields_quotes() {
        assert_eq!(split_fields("a;b;c"), vec!["a", "b", "c"]);
        assert_eq!(split_fields("NODE;;\"JOIN\""), vec!["NODE", "", "JOIN"]);
        assert_eq!(
            split_fields("TABLE;0;\"WITH (a;b) \"\"x\"\"\";true"),
            vec!["TABLE", "0", "WITH (a;b) \"x\"", "true"]
        );
        assert_eq!(split_fields(""), vec![""]);
    }

    #[test]
    fn test_load_disabled_options() {
        let input = "Type;Key;Name\n\
                     NODE;;\"JOIN\"\n\
                     COMPOSITE;FUNCTION;\"{\"\"FunctionName\"\":\"\"ABS\"\"}\"\n\
                     TABLE;0;\"UNLOGGED\"\n\
                     NODE;;\"NOT_A_NODE\"\n\
                     garbage\n";
        let mut s = stats();
        let applied = load_disabled_options(input.as_bytes(), &mut s).unwrap();
        assert_eq!(applied, 3);
        assert!(!s.option(&SyntaxFeature::Node(Node::JOIN)));
        assert!(!s.option(&SyntaxFeature::Composite(CompositeKey::FunctionName("ABS".into()))));
        assert!(!s.option(&SyntaxFeature::Fragment(FragmentKey::new(
            HoleKind::Table,
            "0",
            "UNLOGGED"
        ))));
    }

    #[test]
    fn test_disabled_options_keep_existing_flags() {
        let mut s = stats();
        s.set_option(SyntaxFeature::Node(Node::CASE), true);
        load_disabled_options("NODE;;CASE\n".as_bytes(), &mut s).unwrap();
        assert!(s.option(&SyntaxFeature::Node(Node::CASE)));
    }

    #[test]
    fn test_statistics_roundtrip_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        let mut s = stats();
        s.set_option(SyntaxFeature::Node(Node::BETWEEN), false);
        s.set_option(
            SyntaxFeature::Fragment(FragmentKey::new(HoleKind::Index, "1", "USING \"hash\"")),
            false,
        );
        write_statistics(&path, &s).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(STATISTICS_HEADER));
        assert!(text.contains("NODE;;\"BETWEEN\";false;0;0;\"\""));

        let mut fresh = stats();
        let file = std::io::BufReader::new(std::fs::File::open(&path).unwrap());
        assert_eq!(load_disabled_options(file, &mut fresh).unwrap(), 2);
        assert!(!fresh.option(&SyntaxFeature::Fragment(FragmentKey::new(
            HoleKind::Index,
            "1",
            "USING \"hash\""
        ))));
    }

    #[test]
    fn test_feature_dump() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = ExecutionRecord::new();
        record.record(SyntaxFeature::Node(Node::SELECT));
        record.record(SyntaxFeature::Node(Node::SELECT));
        let path = write_feature_dump(dir.path(), "database0", &record).unwrap();
        assert!(path.ends_with("database0Options.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "SELECT : 2\n");
    }
}
