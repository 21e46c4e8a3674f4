// Resource usage samples

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

const CSV_HEADER: &str = "time,cpu,ram";

/// One monitor tick: seconds since launch, summed CPU percent, summed RAM in MB
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub time_secs: f64,
    pub cpu_percent: f64,
    pub ram_mb: f64,
}

impl ResourceSample {
    pub fn new(time_secs: f64, cpu_percent: f64, ram_mb: f64) -> Self {
        Self {
            time_secs,
            cpu_percent,
            ram_mb,
        }
    }
}

/// Time-ordered series of samples for one execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSeries {
    samples: Vec<ResourceSample>,
}

impl UsageSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. Samples that would go back in time are dropped.
    pub fn push(&mut self, sample: ResourceSample) -> bool {
        if let Some(last) = self.samples.last() {
            if sample.time_secs < last.time_secs {
                return false;
            }
        }
        self.samples.push(sample);
        true
    }

    pub fn samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn max_cpu(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.cpu_percent).reduce(f64::max)
    }

    pub fn max_ram(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.ram_mb).reduce(f64::max)
    }

    /// Render as `time,cpu,ram` CSV
    pub fn to_csv(&self) -> String {
        let mut out = String::with_capacity(16 + self.samples.len() * 24);
        out.push_str(CSV_HEADER);
        out.push('\n');
        for s in &self.samples {
            out.push_str(&format!("{},{},{}\n", s.time_secs, s.cpu_percent, s.ram_mb));
        }
        out
    }

    pub fn parse_csv(text: &str) -> Result<Self> {
        let mut series = Self::new();
        let mut lines = text.lines().enumerate();

        match lines.next() {
            Some((_, header)) if header.trim() == CSV_HEADER => {}
            Some((_, header)) => {
                return Err(DomainError::MalformedUsage {
                    line: 1,
                    reason: format!("unexpected header '{}'", header.trim()),
                })
            }
            None => return Ok(series),
        }

        for (idx, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != 3 {
                return Err(DomainError::MalformedUsage {
                    line: idx + 1,
                    reason: format!("expected 3 fields, found {}", fields.len()),
                });
            }
            let parse = |f: &str| {
                f.parse::<f64>().map_err(|e| DomainError::MalformedUsage {
                    line: idx + 1,
                    reason: e.to_string(),
                })
            };
            series.push(ResourceSample::new(
                parse(fields[0])?,
                parse(fields[1])?,
                parse(fields[2])?,
            ));
        }
        Ok(series)
    }
}

impl Extend<ResourceSample> for UsageSeries {
    fn extend<I: IntoIterator<Item = ResourceSample>>(&mut self, iter: I) {
        for sample in iter {
            self.push(sample);
        }
    }
}

impl FromIterator<ResourceSample> for UsageSeries {
    fn from_iter<I: IntoIterator<Item = ResourceSample>>(iter: I) -> Self {
        let mut series = Self::new();
        series.extend(iter);
        series
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_layout() {
        let series: UsageSeries = vec![
            ResourceSample::new(0.0, 12.5, 100.0),
            ResourceSample::new(0.1, 50.0, 180.25),
        ]
        .into_iter()
        .collect();

        let csv = series.to_csv();
        assert!(csv.starts_with("time,cpu,ram\n"));
        assert_eq!(csv.lines().count(), 3);

        let parsed = UsageSeries::parse_csv(&csv).unwrap();
        assert_eq!(parsed.max_cpu(), Some(50.0));
        assert_eq!(parsed.max_ram(), Some(180.25));
    }

    #[test]
    fn test_push_keeps_time_order() {
        let mut series = UsageSeries::new();
        assert!(series.push(ResourceSample::new(1.0, 0.0, 0.0)));
        assert!(!series.push(ResourceSample::new(0.5, 0.0, 0.0)));
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_bad_header() {
        let err = UsageSeries::parse_csv("t,c,r\n0,0,0\n").unwrap_err();
        assert!(matches!(err, DomainError::MalformedUsage { line: 1, .. }));
    }

    #[test]
    fn test_empty_series_has_no_max() {
        let series = UsageSeries::parse_csv("time,cpu,ram\n").unwrap();
        assert!(series.is_empty());
        assert_eq!(series.max_cpu(), None);
    }
}
