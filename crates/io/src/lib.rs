use anyhow::{Context, Result};
use model::*;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufRead, BufWriter, Write},
    path::Path,
};

/// Loads a trace, picking the format from the file extension (`.csv`, anything
/// else is read as NDJSON).
pub fn import_trace(path: &Path) -> Result<Vec<PositionSample>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => import_csv(path),
        _ => import_ndjson(path),
    }
}

pub fn import_csv(path: &Path) -> Result<Vec<PositionSample>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let mut samples = Vec::new();
    for (i, rec) in rdr.deserialize().enumerate() {
        let r: CsvRow = rec.with_context(|| format!("{} row {}", path.display(), i + 1))?;
        let coordinate = Coordinate::new(r.latitude, r.longitude)
            .with_context(|| format!("{} row {}", path.display(), i + 1))?;
        samples.push(PositionSample {
            coordinate,
            instant_speed_mps: r.speed_mps,
            heading_deg: r.heading_deg,
            timestamp_ms: r.timestamp_ms,
        });
    }
    Ok(samples)
}

pub fn export_csv(samples: &[PositionSample], path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path)?;
    for s in samples {
        w.serialize(CsvRow {
            timestamp_ms: s.timestamp_ms,
            latitude: s.coordinate.latitude,
            longitude: s.coordinate.longitude,
            speed_mps: s.instant_speed_mps,
            heading_deg: s.heading_deg,
        })?;
    }
    w.flush()?;
    Ok(())
}

pub fn import_ndjson(path: &Path) -> Result<Vec<PositionSample>> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let rdr = std::io::BufReader::new(f);
    let mut samples = vec![];
    for (i, line) in rdr.lines().enumerate() {
        let s = line?;
        if s.trim().is_empty() {
            continue;
        }
        let sample: PositionSample = serde_json::from_str(&s)
            .with_context(|| format!("{} line {}", path.display(), i + 1))?;
        sample.coordinate.validate()
            .with_context(|| format!("{} line {}", path.display(), i + 1))?;
        samples.push(sample);
    }
    Ok(samples)
}

pub fn export_ndjson(samples: &[PositionSample], path: &Path) -> Result<()> {
    let mut rec = TraceRecorder::create(path)?;
    for s in samples {
        rec.record(s)?;
    }
    rec.flush()
}

/// Appends samples to an NDJSON trace as they arrive.
pub struct TraceRecorder {
    w: BufWriter<File>,
}

impl TraceRecorder {
    pub fn create(path: &Path) -> Result<Self> {
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        Ok(Self { w: BufWriter::new(f) })
    }

    pub fn record(&mut self, sample: &PositionSample) -> Result<()> {
        let s = serde_json::to_string(sample)?;
        writeln!(self.w, "{}", s)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w.flush()?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct CsvRow {
    timestamp_ms: i64,
    latitude: f64,
    longitude: f64,
    speed_mps: Option<f64>,
    heading_deg: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn trace() -> Vec<PositionSample> {
        vec![
            PositionSample {
                coordinate: Coordinate { latitude: 42.6977, longitude: 23.3219 },
                instant_speed_mps: Some(12.5),
                heading_deg: None,
                timestamp_ms: 1_000,
            },
            PositionSample::at(Coordinate { latitude: 42.6980, longitude: 23.3225 }, 2_000),
        ]
    }

    #[test]
    fn csv_keeps_optional_columns() {
        let dir = TempDir::new("trace").unwrap();
        let path = dir.path().join("drive.csv");
        export_csv(&trace(), &path).unwrap();
        assert_eq!(import_trace(&path).unwrap(), trace());
    }

    #[test]
    fn recorder_output_replays() {
        let dir = TempDir::new("trace").unwrap();
        let path = dir.path().join("drive.ndjson");
        export_ndjson(&trace(), &path).unwrap();
        assert_eq!(import_trace(&path).unwrap(), trace());
    }

    #[test]
    fn ndjson_keeps_full_float_precision() {
        let dir = TempDir::new("trace").unwrap();
        let path = dir.path().join("precise.ndjson");
        let fix = PositionSample::at(Coordinate { latitude: 42.706693203637236, longitude: 23.3219 }, 0);
        let mut rec = TraceRecorder::create(&path).unwrap();
        rec.record(&fix).unwrap();
        rec.flush().unwrap();
        let back = import_ndjson(&path).unwrap();
        assert_eq!(back[0].coordinate.latitude.to_bits(), 42.706693203637236f64.to_bits());
        assert_eq!(back, vec![fix]);
    }

    #[test]
    fn rejects_out_of_range_rows() {
        let dir = TempDir::new("trace").unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "timestamp_ms,latitude,longitude,speed_mps,heading_deg\n1,91.0,23.0,,\n").unwrap();
        let err = import_csv(&path).unwrap_err();
        assert!(format!("{err:#}").contains("row 1"));
    }
}
