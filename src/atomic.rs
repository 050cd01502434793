use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::Builder;

const TEMP_PREFIX: &str = ".monitor.tmp.";

/// Writes `value` as pretty JSON to a temp file beside `path`, then renames it over
/// `path`. Readers of the history or config see the old document or the new one,
/// never a torn write. The temp file is removed on any failure.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut out, value)?;
        out.write_all(b"\n")?;
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir);
    Ok(())
}

// Best effort: the rename already happened.
fn sync_dir(dir: &Path) {
    if cfg!(unix) {
        if let Ok(f) = File::open(dir) {
            let _ = f.sync_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with(TEMP_PREFIX))
            .collect()
    }

    #[test]
    fn replaces_document_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "old").unwrap();

        write_json(&path, &[1]).unwrap();
        write_json(&path, &[1, 2]).unwrap();

        let back: Vec<u32> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, [1, 2]);
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn keeps_non_ascii_text_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_json(&path, &json!({"note_title": "小美邀请码"})).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("小美邀请码"));
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/config.json");
        write_json(&path, &json!({})).unwrap();
        let back: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, json!({}));
    }

    #[test]
    fn failed_rename_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("taken");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("inside"), "x").unwrap();

        assert!(write_json(&target, &[1]).is_err());
        assert!(target.is_dir());
        assert!(leftovers(dir.path()).is_empty());
    }
}
