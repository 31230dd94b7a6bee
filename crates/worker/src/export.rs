use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use ensemble_domain::{EnsembleResult, ResultSink, StateRecord, StateStore};

/// 每行一个 JSON 对象的结果文件
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonLinesSink {
    pub fn create(path: impl AsRef<Path>) -> EnsembleResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl ResultSink for JsonLinesSink {
    fn write(&mut self, records: &[StateRecord]) -> EnsembleResult<()> {
        for record in records {
            serde_json::to_writer(&mut self.writer, record)?;
            self.writer.write_all(b"\n")?;
        }
        self.written += records.len();
        Ok(())
    }

    fn flush(&mut self) -> EnsembleResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// 把状态表全部记录写入输出端并刷新，返回写入的记录数
pub fn export_results(store: &StateStore, sink: &mut dyn ResultSink) -> EnsembleResult<usize> {
    let records = store.records();
    sink.write(&records)?;
    sink.flush()?;
    info!(records = records.len(), "结果已导出");
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_domain::WorkerRole;
    use ensemble_testing_utils::test_day;
    use tempfile::TempDir;

    #[test]
    fn test_json_lines_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("results.jsonl");

        let store = StateStore::new(&["LAI".into(), "SW1".into()], 2);
        store
            .write_prior(test_day(0), WorkerRole::Truth, &[1.0, 0.3])
            .unwrap();
        store
            .write_prior(test_day(1), WorkerRole::Ensemble(1), &[1.2, 0.25])
            .unwrap();

        let mut sink = JsonLinesSink::create(&path).unwrap();
        let count = export_results(&store, &mut sink).unwrap();
        assert_eq!(count, 4);
        assert_eq!(sink.written(), 4);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["table"], "LAI");
        assert_eq!(lines[0]["day"], 0);
        assert_eq!(lines[0]["truth"], 1.0);
        assert_eq!(lines[1]["prior_ensemble_1"], 1.2);
        assert!(lines[1]["truth"].is_null());
        assert_eq!(lines[3]["table"], "SW1");
        assert_eq!(lines[3]["day_of_year"], 2);
    }
}
