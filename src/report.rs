use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{QualityError, Result};
use crate::quality::{Metric, Quality};

/// JSON has no encoding for non-finite numbers, so they are written as the strings `"Infinity"`,
/// `"-Infinity"` and `"NaN"`. Finite scores stay plain numbers.
mod score {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const INFINITY: &str = "Infinity";
    pub const NEG_INFINITY: &str = "-Infinity";
    pub const NAN: &str = "NaN";

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str(NAN)
        } else if value.is_sign_positive() {
            serializer.serialize_str(INFINITY)
        } else {
            serializer.serialize_str(NEG_INFINITY)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Encoded::deserialize(deserializer)? {
            Encoded::Number(value) => Ok(value),
            Encoded::Text(text) => match text.as_str() {
                INFINITY => Ok(f64::INFINITY),
                NEG_INFINITY => Ok(f64::NEG_INFINITY),
                NAN => Ok(f64::NAN),
                _ => Err(D::Error::custom(format!("invalid quality score {text:?}"))),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    #[serde(with = "score")]
    pub quality_score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
}

impl MetricResult {
    #[must_use]
    pub const fn classified(quality_score: f64, quality: Quality) -> Self {
        Self {
            quality_score,
            quality: Some(quality),
        }
    }

    #[must_use]
    pub const fn raw(quality_score: f64) -> Self {
        Self {
            quality_score,
            quality: None,
        }
    }
}

/// Every metric computed for one video, keyed by the video's file name when serialized.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, BTreeMap<String, MetricResult>>")]
pub struct QualityReport {
    name: String,
    metrics: BTreeMap<Metric, MetricResult>,
}

impl QualityReport {
    #[must_use]
    pub const fn new(name: String, metrics: BTreeMap<Metric, MetricResult>) -> Self {
        Self { name, metrics }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn get(&self, metric: Metric) -> Option<&MetricResult> {
        self.metrics.get(&metric)
    }

    pub fn metrics(&self) -> impl Iterator<Item = (Metric, &MetricResult)> {
        self.metrics.iter().map(|(metric, result)| (*metric, result))
    }
}

struct MetricTable<'a>(&'a BTreeMap<Metric, MetricResult>);

impl Serialize for MetricTable<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;

        for (metric, result) in self.0 {
            map.serialize_entry(metric.key(), result)?;
        }

        map.end()
    }
}

impl Serialize for QualityReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &MetricTable(&self.metrics))?;
        map.end()
    }
}

impl TryFrom<BTreeMap<String, BTreeMap<String, MetricResult>>> for QualityReport {
    type Error = String;

    fn try_from(
        value: BTreeMap<String, BTreeMap<String, MetricResult>>,
    ) -> std::result::Result<Self, Self::Error> {
        if value.len() != 1 {
            return Err(format!(
                "expected exactly one video per record, found {}",
                value.len()
            ));
        }

        let (name, table) = value
            .into_iter()
            .next()
            .ok_or_else(|| "empty record".to_owned())?;

        let metrics = table
            .into_iter()
            .map(|(key, result)| {
                Metric::from_key(&key)
                    .map(|metric| (metric, result))
                    .ok_or_else(|| format!("unknown metric {key:?}"))
            })
            .collect::<std::result::Result<_, _>>()?;

        Ok(Self { name, metrics })
    }
}

/// Reports for one batch, in directory-scan order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchReport {
    reports: Vec<QualityReport>,
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(OsString::from(".tmp"));
    PathBuf::from(name)
}

/// Makes sure the report can be written to `path` before any video is processed.
pub fn prepare_output(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| QualityError::batch_io(parent, err))?;
    }

    if path.is_dir() {
        return Err(QualityError::batch_io(
            path,
            std::io::Error::other("output path is a directory"),
        ));
    }

    let probe = temporary_path(path);
    File::create(&probe).map_err(|err| QualityError::batch_io(&probe, err))?;
    fs::remove_file(&probe).map_err(|err| QualityError::batch_io(&probe, err))?;

    Ok(())
}

impl BatchReport {
    #[must_use]
    pub const fn new(reports: Vec<QualityReport>) -> Self {
        Self { reports }
    }

    #[must_use]
    pub fn reports(&self) -> &[QualityReport] {
        &self.reports
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&QualityReport> {
        self.reports.iter().find(|report| report.name == name)
    }

    /// Writes the whole batch in one go: serialized to a sibling temporary file, then renamed
    /// over `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let temporary_path = temporary_path(path);

        let file =
            File::create(&temporary_path).map_err(|err| QualityError::batch_io(&temporary_path, err))?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|err| QualityError::batch_io(&temporary_path, err.into()))?;
        writer
            .write_all(b"\n")
            .and_then(|()| writer.flush())
            .map_err(|err| QualityError::batch_io(&temporary_path, err))?;
        drop(writer);

        fs::rename(&temporary_path, path).map_err(|err| QualityError::batch_io(path, err))?;

        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| QualityError::batch_io(path, err))?;

        serde_json::from_reader(BufReader::new(file))
            .map_err(|err| QualityError::batch_io(path, err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, psnr: f64) -> QualityReport {
        QualityReport::new(
            name.to_owned(),
            BTreeMap::from([
                (
                    Metric::PeakSignalToNoiseRatio,
                    MetricResult::classified(psnr, Quality::Clear),
                ),
                (
                    Metric::Laplacian,
                    MetricResult::classified(12.5, Quality::Blur),
                ),
                (Metric::SimpleVqa, MetricResult::raw(0.61)),
            ]),
        )
    }

    #[test]
    fn record_layout() {
        let value = serde_json::to_value(BatchReport::new(vec![report("a.mp4", 41.0)])).unwrap();

        assert_eq!(
            value,
            serde_json::json!([
                {
                    "a.mp4": {
                        "laplacian": { "quality_score": 12.5, "quality": "Blur" },
                        "peak_signal_to_noise_ratio": { "quality_score": 41.0, "quality": "Clear" },
                        "simple_VQA": { "quality_score": 0.61 }
                    }
                }
            ])
        );
    }

    #[test]
    fn metrics_keep_report_order() {
        let text = serde_json::to_string(&report("a.mp4", 41.0)).unwrap();
        let laplacian = text.find("laplacian").unwrap();
        let psnr = text.find("peak_signal_to_noise_ratio").unwrap();
        let vqa = text.find("simple_VQA").unwrap();
        assert!(laplacian < psnr && psnr < vqa);
    }

    #[test]
    fn infinity_is_a_string() {
        let text = serde_json::to_string(&MetricResult::classified(f64::INFINITY, Quality::Clear))
            .unwrap();
        assert_eq!(text, r#"{"quality_score":"Infinity","quality":"Clear"}"#);

        let text = serde_json::to_string(&MetricResult::raw(f64::NEG_INFINITY)).unwrap();
        assert_eq!(text, r#"{"quality_score":"-Infinity"}"#);

        let text = serde_json::to_string(&MetricResult::raw(f64::NAN)).unwrap();
        assert_eq!(text, r#"{"quality_score":"NaN"}"#);
    }

    #[test]
    fn infinity_reads_back() {
        let result: MetricResult =
            serde_json::from_str(r#"{"quality_score":"Infinity","quality":"Clear"}"#).unwrap();
        assert_eq!(result.quality_score, f64::INFINITY);
        assert_eq!(result.quality, Some(Quality::Clear));

        let result: MetricResult = serde_json::from_str(r#"{"quality_score":3.5}"#).unwrap();
        assert!((result.quality_score - 3.5).abs() < f64::EPSILON);
        assert_eq!(result.quality, None);

        assert!(serde_json::from_str::<MetricResult>(r#"{"quality_score":"huge"}"#).is_err());
    }

    #[test]
    fn write_then_read() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("nested").join("report.json");
        let batch = BatchReport::new(vec![
            report("a.mp4", f64::INFINITY),
            report("c.mp4", 14.25),
        ]);

        prepare_output(&path).unwrap();
        batch.write(&path).unwrap();

        assert!(!temporary_path(&path).exists());
        assert_eq!(BatchReport::read(&path).unwrap(), batch);
        assert_eq!(
            BatchReport::read(&path)
                .unwrap()
                .get("a.mp4")
                .and_then(|report| report.get(Metric::PeakSignalToNoiseRatio))
                .map(|result| result.quality_score),
            Some(f64::INFINITY)
        );
    }

    #[test]
    fn directory_output_is_rejected() {
        let directory = tempfile::tempdir().unwrap();
        assert!(matches!(
            prepare_output(directory.path()),
            Err(QualityError::BatchIo { .. })
        ));
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let text = r#"[{"a.mp4": {"sharpness": {"quality_score": 1.0}}}]"#;
        assert!(serde_json::from_str::<BatchReport>(text).is_err());
    }
}
