// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 预测记录
//!
//! 每次单图预测/视频截图识别得到非空结果时写入一条,
//! "未检测到目标" 和跟踪模式下的检测结果都不记录

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::detection::Detection;
use crate::error::RecordError;

/// 一条预测记录
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub actor_id: i64,
    pub source_path: String,
    pub result_label: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

impl PredictionRecord {
    /// 以当前时间创建记录
    pub fn new(actor_id: i64, source_path: impl AsRef<Path>, detection: &Detection) -> Self {
        Self {
            actor_id,
            source_path: source_path.as_ref().display().to_string(),
            result_label: detection.label.clone(),
            confidence: detection.confidence,
            timestamp: Utc::now(),
        }
    }
}

/// 预测记录写入端
pub trait PredictionSink {
    fn record(&mut self, record: &PredictionRecord) -> Result<(), RecordError>;
}

/// SQLite 记录表 `prediction_log`
pub struct SqliteSink {
    connection: Connection,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("⚠️ 创建数据目录失败 {}: {}", parent.display(), e);
            }
        }
        let connection = Connection::open(path)?;
        Self::initialize_database(&connection)?;
        log::debug!("🗄️ 预测记录库: {}", path.display());
        Ok(Self { connection })
    }

    pub fn open_in_memory() -> Result<Self, RecordError> {
        let connection = Connection::open_in_memory()?;
        Self::initialize_database(&connection)?;
        Ok(Self { connection })
    }

    fn initialize_database(conn: &Connection) -> Result<(), RecordError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS prediction_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_id INTEGER NOT NULL,
                source_path TEXT NOT NULL,
                result_label TEXT NOT NULL,
                confidence REAL NOT NULL,
                timestamp TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// 最近的记录 (新的在前)
    pub fn recent(&self, limit: usize) -> Result<Vec<PredictionRecord>, RecordError> {
        self.query(
            "SELECT actor_id, source_path, result_label, confidence, timestamp
             FROM prediction_log ORDER BY id DESC LIMIT ?1",
            params![limit as i64],
        )
    }

    /// 某个用户的全部记录 (新的在前)
    pub fn by_actor(&self, actor_id: i64) -> Result<Vec<PredictionRecord>, RecordError> {
        self.query(
            "SELECT actor_id, source_path, result_label, confidence, timestamp
             FROM prediction_log WHERE actor_id = ?1 ORDER BY id DESC",
            params![actor_id],
        )
    }

    fn query(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<PredictionRecord>, RecordError> {
        let mut stmt = self.connection.prepare(sql)?;
        let rows = stmt.query_map(params, |row: &rusqlite::Row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f32>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (actor_id, source_path, result_label, confidence, timestamp) = row?;
            records.push(PredictionRecord {
                actor_id,
                source_path,
                result_label,
                confidence,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)?.with_timezone(&Utc),
            });
        }
        Ok(records)
    }
}

impl PredictionSink for SqliteSink {
    fn record(&mut self, record: &PredictionRecord) -> Result<(), RecordError> {
        self.connection.execute(
            "INSERT INTO prediction_log (actor_id, source_path, result_label, confidence, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.actor_id,
                record.source_path,
                record.result_label,
                record.confidence,
                record.timestamp.to_rfc3339(),
            ],
        )?;
        log::debug!(
            "📝 记录预测: 用户 {} → {} ({:.2})",
            record.actor_id,
            record.result_label,
            record.confidence
        );
        Ok(())
    }
}

/// 内存记录 (测试/试运行)
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<PredictionRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }
}

impl PredictionSink for MemorySink {
    fn record(&mut self, record: &PredictionRecord) -> Result<(), RecordError> {
        self.records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    fn detection(label: &str, confidence: f32) -> Detection {
        Detection {
            label: label.to_string(),
            raw_category: 0,
            native_name: label.to_string(),
            confidence,
            bounding_box: Some(BoundingBox {
                x1: 0.,
                y1: 0.,
                x2: 1.,
                y2: 1.,
            }),
            track_id: None,
        }
    }

    #[test]
    fn test_sqlite_roundtrip_and_filters() {
        let mut sink = SqliteSink::open_in_memory().unwrap();
        sink.record(&PredictionRecord::new(1, "a.jpg", &detection("柴犬", 0.9)))
            .unwrap();
        sink.record(&PredictionRecord::new(2, "b.jpg", &detection("巴哥犬", 0.6)))
            .unwrap();
        sink.record(&PredictionRecord::new(1, "c.jpg", &detection("萨摩耶", 0.7)))
            .unwrap();

        let recent = sink.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].source_path, "c.jpg");

        let mine = sink.by_actor(1).unwrap();
        let labels: Vec<&str> = mine.iter().map(|r| r.result_label.as_str()).collect();
        assert_eq!(labels, vec!["萨摩耶", "柴犬"]);
        assert!((mine[1].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_sqlite_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/predictions.db");
        let record = PredictionRecord::new(7, "dog.png", &detection("pug", 0.5));
        {
            let mut sink = SqliteSink::open(&path).unwrap();
            sink.record(&record).unwrap();
        }
        let sink = SqliteSink::open(&path).unwrap();
        let all = sink.recent(10).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].actor_id, 7);
        assert_eq!(all[0].timestamp.timestamp(), record.timestamp.timestamp());
    }

    #[test]
    fn test_memory_sink() {
        let mut sink = MemorySink::new();
        sink.record(&PredictionRecord::new(1, "x.jpg", &detection("dog", 0.3)))
            .unwrap();
        assert_eq!(sink.records().len(), 1);
    }
}
